//! pulsewatch - service uptime monitor
//!
//! Checks every configured target over HTTP, TCP, UDP, ICMP or gRPC on its
//! own drift-corrected schedule and records hits and failures in SQLite.

mod config;
mod db;
mod probe;
mod recorder;
mod scheduler;

use config::ServerConfig;
use db::{ProtocolKind, Store, Target};
use recorder::{LogNotifier, Recorder};
use scheduler::{CheckCycle, Fleet, Monitor};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pulsewatch=info".parse()?))
        .init();

    let cfg = ServerConfig::load();
    tracing::info!("Starting pulsewatch...");
    tracing::info!("Using database at {}", cfg.db_path);

    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    if store.get_targets()?.is_empty() {
        seed_targets(&cfg, &store)?;
    }

    let recorder = Recorder::new(store.clone(), Arc::new(LogNotifier), cfg.recorder());

    let monitors: Vec<Arc<dyn CheckCycle>> = store
        .get_targets()?
        .into_iter()
        .map(|target| Arc::new(Monitor::new(target, recorder.clone())) as Arc<dyn CheckCycle>)
        .collect();

    let fleet = Fleet::new();
    fleet.launch(monitors).await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    fleet.stop_all().await;

    Ok(())
}

/// Fill an empty store from the seed file, or with a sample target.
fn seed_targets(
    cfg: &ServerConfig,
    store: &Store,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let targets = match &cfg.seed_path {
        Some(path) => {
            let targets = config::load_seed(path)?;
            tracing::info!("Importing {} targets from {}", targets.len(), path.display());
            targets
        }
        None => {
            tracing::info!("Adding sample target: Google");
            vec![Target {
                name: "Google".to_string(),
                kind: ProtocolKind::Http,
                address: "https://google.com".to_string(),
                verify_ssl: true,
                ..Default::default()
            }]
        }
    };

    for mut target in targets {
        store.add_target(&mut target)?;
    }

    Ok(())
}
