// SPDX-FileCopyrightText: 2026 Palaver Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Termination signal handling.
//!
//! Installs handlers for SIGTERM and SIGINT (Ctrl+C), triggering a
//! [`CancellationToken`] that the dispatch loop monitors. A second signal
//! while shutdown is in progress forces immediate process termination.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Installs signal handlers for SIGTERM and SIGINT.
///
/// Returns a [`CancellationToken`] that is cancelled when either signal is
/// received. A second signal exits the process immediately.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("termination signal received, initiating shutdown");
        token_clone.cancel();

        wait_for_signal().await;
        error!("second termination signal received, exiting immediately");
        std::process::exit(130);
    });

    token
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_signal_handler_returns_live_token() {
        let token = install_signal_handler();
        assert!(!token.is_cancelled());
        // Cancel manually to clean up; the background task stays parked on
        // the signal future and dies with the runtime.
        token.cancel();
    }
}
