// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `palaver serve` command implementation.
//!
//! Wires storage, the container sandbox, the scheduler, and the dispatch
//! loop, then runs until a termination signal arrives. Startup performs the
//! crash-recovery orphan cleanup pass before any new work is accepted.
//! Platform channel adapters register through the runtime's library API;
//! the core binary carries none of their wire protocols.

use std::sync::Arc;

use palaver_config::model::PalaverConfig;
use palaver_core::{PalaverError, SandboxExecutor, StorageAdapter};
use palaver_runtime::{Orchestrator, shutdown};
use palaver_sandbox::ContainerRunner;
use palaver_storage::SqliteStorage;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Depth of the inbound dispatch channel.
const INBOUND_QUEUE_DEPTH: usize = 256;

/// Runs the `palaver serve` command.
pub async fn run_serve(config: PalaverConfig) -> Result<(), PalaverError> {
    init_tracing(&config.orchestrator.log_level);
    info!(name = config.orchestrator.name.as_str(), "starting palaver serve");

    // Initialize storage.
    let storage = Arc::new(SqliteStorage::new(config.storage.clone()));
    storage.initialize().await?;
    info!(path = config.storage.database_path.as_str(), "storage ready");

    // Initialize the sandbox and remove anything a crashed predecessor
    // left behind, before accepting new work.
    let sandbox = Arc::new(ContainerRunner::new(config.sandbox.clone()));
    match sandbox.cleanup_orphans().await {
        Ok(0) => debug!("no orphaned sandbox containers"),
        Ok(count) => info!(count, "orphaned sandbox containers removed"),
        Err(e) => warn!(error = %e, "orphan cleanup failed, continuing"),
    }

    let orchestrator = Orchestrator::new(config, storage, sandbox);
    orchestrator.init_scheduler();
    orchestrator.start_background();
    info!("scheduler and background tasks started");

    // The inbound channel feeds the dispatch loop. Channel adapters hold
    // clones of the sender and register themselves on the orchestrator.
    let (_inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
    warn!("no channel adapters registered; intake is adapter-driven");

    let cancel = shutdown::install_signal_handler();
    orchestrator.run(inbound_rx, cancel).await;

    info!("palaver serve shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("palaver={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
