//! OS signal handling.
//!
//! # Responsibilities
//! - Register signal handlers (SIGTERM, SIGINT, SIGHUP)
//! - Translate signals to internal events
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers a data reload, not shutdown

use tokio::sync::mpsc;

use crate::data::watcher::ReloadTrigger;
use crate::lifecycle::Shutdown;

/// Resolve when SIGINT or SIGTERM arrives.
pub async fn wait_for_termination() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Spawn the task that turns termination signals into a shutdown.
pub fn spawn_shutdown_listener(shutdown: &Shutdown) {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        tracing::info!("Shutdown signal received");
        shutdown.trigger();
    });
}

/// Spawn the task that turns SIGHUP into reload requests.
#[cfg(unix)]
pub fn spawn_reload_listener(reload_tx: mpsc::UnboundedSender<ReloadTrigger>, shutdown: &Shutdown) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    tracing::info!("SIGHUP received, requesting reload");
                    if reload_tx.send(ReloadTrigger::Signal).is_err() {
                        return;
                    }
                }
                _ = shutdown_rx.recv() => return,
            }
        }
    });
}

#[cfg(not(unix))]
pub fn spawn_reload_listener(_reload_tx: mpsc::UnboundedSender<ReloadTrigger>, _shutdown: &Shutdown) {}
