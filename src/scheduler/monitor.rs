//! A target bound to its probe, live status and recorder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CheckCycle;
use crate::db::{Target, TargetStatus};
use crate::probe::{CheckOutcome, Probe};
use crate::recorder::Recorder;

pub struct Monitor {
    target: Target,
    status: Arc<RwLock<TargetStatus>>,
    probe: Probe,
    recorder: Recorder,
}

impl Monitor {
    pub fn new(target: Target, recorder: Recorder) -> Self {
        let probe = Probe::for_kind(target.kind);
        Self {
            target,
            status: Arc::new(RwLock::new(TargetStatus::default())),
            probe,
            recorder,
        }
    }

    /// Shared handle to the live status, for readers outside the loop.
    pub fn status(&self) -> Arc<RwLock<TargetStatus>> {
        self.status.clone()
    }
}

#[async_trait]
impl CheckCycle for Monitor {
    fn id(&self) -> i64 {
        self.target.id
    }

    fn name(&self) -> &str {
        &self.target.name
    }

    fn interval(&self) -> Duration {
        self.target.interval_duration()
    }

    async fn check(&self, record: bool) -> bool {
        let outcome = self.probe.attempt(&self.target).await;

        let entry = {
            let mut status = self.status.write().await;
            apply_measurements(&mut status, &outcome);

            if !record {
                return outcome.is_success();
            }
            match &outcome.issue {
                None => self.recorder.record_success(&self.target, &mut status),
                Some(issue) => self.recorder.record_failure(&self.target, &mut status, issue),
            }
        };

        // Status lock released; storage and hooks may be slow.
        self.recorder.publish(&self.target, entry).await;

        outcome.is_success()
    }
}

/// Copy whatever the attempt measured onto the status.
fn apply_measurements(status: &mut TargetStatus, outcome: &CheckOutcome) {
    if let Some(latency) = outcome.latency {
        status.latency = latency;
    }
    if let Some(ping_time) = outcome.ping_time {
        status.ping_time = ping_time;
    }
    if let Some(response) = &outcome.response {
        status.last_response = response.clone();
    }
    if let Some(code) = outcome.status_code {
        status.last_status_code = code;
    }
}
