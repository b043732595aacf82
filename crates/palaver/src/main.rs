// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Palaver - a multi-tenant chat orchestrator for sandboxed agent turns.
//!
//! This is the binary entry point.

mod doctor;
mod serve;

use clap::{Parser, Subcommand};

/// Palaver - a multi-tenant chat orchestrator for sandboxed agent turns.
#[derive(Parser, Debug)]
#[command(name = "palaver", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the orchestrator.
    Serve,
    /// Check configuration, storage, and the container runtime.
    Doctor,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match palaver_config::load_and_validate() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Doctor) => doctor::run_doctor(config).await,
        Some(Commands::Serve) | None => serve::run_serve(config).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn binary_loads_config_defaults() {
        // Verify config loads with defaults (no config file needed).
        let config = palaver_config::load_and_validate()
            .expect("default config should be valid");
        assert_eq!(config.orchestrator.name, "palaver");
    }
}
