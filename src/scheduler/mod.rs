//! Scheduler module: one drift-corrected check loop per target.

mod cadence;
mod monitor;

pub use cadence::*;
pub use monitor::*;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

/// One target's check, as seen by its loop.
#[async_trait]
pub trait CheckCycle: Send + Sync + 'static {
    fn id(&self) -> i64;
    fn name(&self) -> &str;
    fn interval(&self) -> Duration;

    /// Run one check and return whether the target is online.
    /// With `record` false nothing is persisted and no hook fires.
    async fn check(&self, record: bool) -> bool;
}

struct LoopSlot {
    stop_tx: broadcast::Sender<()>,
    /// Signalled, but the loop may still be finishing a check.
    stopping: bool,
}

/// Owns the running check loops, keyed by target id.
///
/// A slot lives until its loop has exited, so a target never has two loops
/// even while one of them is shutting down.
#[derive(Clone, Default)]
pub struct Fleet {
    loops: Arc<RwLock<HashMap<i64, LoopSlot>>>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a loop for every cycle. Returns how many were started.
    pub async fn launch(&self, cycles: Vec<Arc<dyn CheckCycle>>) -> usize {
        tracing::info!("Starting scheduler with {} targets", cycles.len());

        let mut started = 0;
        for cycle in cycles {
            if self.add(cycle).await {
                started += 1;
            }
        }
        started
    }

    /// Start a loop for one target. Refuses targets that still have a loop,
    /// including one that was stopped but has not exited yet.
    pub async fn add(&self, cycle: Arc<dyn CheckCycle>) -> bool {
        let mut loops = self.loops.write().await;

        let id = cycle.id();
        if let Some(slot) = loops.get(&id) {
            if slot.stopping {
                tracing::warn!("Scheduler: {} is still stopping", cycle.name());
            } else {
                tracing::warn!("Scheduler: {} is already running", cycle.name());
            }
            return false;
        }

        let (stop_tx, stop_rx) = broadcast::channel(1);
        loops.insert(
            id,
            LoopSlot {
                stop_tx,
                stopping: false,
            },
        );
        drop(loops);

        tracing::info!("Scheduler: Adding target {}", cycle.name());

        let loops = self.loops.clone();
        tokio::spawn(async move {
            run_check_loop(cycle, stop_rx).await;

            // Clean up when done
            loops.write().await.remove(&id);
        });

        true
    }

    /// Signal one loop to stop at its next wait. Returns false if no loop
    /// was running or it was already stopping.
    pub async fn stop(&self, id: i64) -> bool {
        let mut loops = self.loops.write().await;

        match loops.get_mut(&id) {
            Some(slot) if !slot.stopping => {
                slot.stopping = true;
                let _ = slot.stop_tx.send(());
                tracing::info!("Scheduler: Stopping target {}", id);
                true
            }
            _ => false,
        }
    }

    pub async fn stop_all(&self) {
        let mut loops = self.loops.write().await;

        tracing::info!("Scheduler: Stopping {} targets", loops.len());
        for slot in loops.values_mut().filter(|slot| !slot.stopping) {
            slot.stopping = true;
            let _ = slot.stop_tx.send(());
        }
    }

    /// Whether a loop for `id` is alive, stopping or not.
    pub async fn is_running(&self, id: i64) -> bool {
        self.loops.read().await.contains_key(&id)
    }

    /// Ids of all live loops, ascending.
    pub async fn running(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.loops.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Run checks for one target until a stop signal arrives.
///
/// The stop signal is only observed while waiting. A check in progress
/// always runs to completion.
pub async fn run_check_loop(cycle: Arc<dyn CheckCycle>, mut stop_rx: broadcast::Receiver<()>) {
    let mut cadence = Cadence::new(Instant::now(), cycle.interval(), cycle.id());

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                break;
            }
            _ = tokio::time::sleep(cadence.sleep()) => {
                let online = cycle.check(true).await;
                cadence.advance(Instant::now(), online);
            }
        }
    }

    tracing::info!("Scheduler: Stopped checking {}", cycle.name());
}
