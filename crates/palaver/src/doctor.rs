// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `palaver doctor` command implementation.
//!
//! Probes the pieces serve depends on and reports each one: configuration
//! echo, storage open + health check, container runtime availability.

use std::sync::Arc;

use palaver_config::model::PalaverConfig;
use palaver_core::{HealthStatus, PalaverError, PluginAdapter, StorageAdapter};
use palaver_sandbox::ContainerRunner;
use palaver_storage::SqliteStorage;

pub async fn run_doctor(config: PalaverConfig) -> Result<(), PalaverError> {
    println!("palaver doctor");
    println!();
    println!("config:");
    println!("  orchestrator.name        = {}", config.orchestrator.name);
    println!(
        "  orchestrator.max_jobs    = {}",
        config.orchestrator.max_concurrent_jobs
    );
    println!("  trigger.mode             = {}", config.trigger.mode);
    println!("  trigger.patterns         = {}", config.trigger.patterns.join(", "));
    println!("  storage.database_path    = {}", config.storage.database_path);
    println!("  sandbox.runtime_binary   = {}", config.sandbox.runtime_binary);
    println!("  sandbox.image            = {}", config.sandbox.image);
    println!("  sandbox.timeout_secs     = {}", config.sandbox.timeout_secs);
    println!();

    // Storage: open, migrate, probe, close.
    let storage = Arc::new(SqliteStorage::new(config.storage.clone()));
    match storage.initialize().await {
        Ok(()) => {
            let status = storage.health_check().await?;
            println!("storage: {}", render_status(&status));
            storage.close().await?;
        }
        Err(e) => println!("storage: FAIL ({e})"),
    }

    // Container runtime availability.
    let sandbox = ContainerRunner::new(config.sandbox.clone());
    let status = sandbox.health_check().await?;
    println!("container runtime: {}", render_status(&status));

    Ok(())
}

fn render_status(status: &HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => "ok".to_string(),
        HealthStatus::Degraded(reason) => format!("degraded ({reason})"),
        HealthStatus::Unhealthy(reason) => format!("FAIL ({reason})"),
    }
}
