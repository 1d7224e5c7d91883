//! Lifecycle (§2, §5 "Cancellation"): signal handling and the overall
//! process exit-code contract. Not present verbatim in the teacher (which
//! has no signal handling of its own); grounded in the `other_examples`
//! TFTP/topk-io-bench pattern of a `tokio::signal::ctrl_c()` future raced
//! against the main work loop.

use tokio::sync::watch;
use tracing::info;

/// Spawns a task that watches for SIGINT (and SIGTERM on unix) and flips
/// the returned watch channel to `true` exactly once. The Engine's
/// processing loop selects on this alongside worker outcomes (§5).
pub fn install_shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = tx.send(true);
    });

    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
