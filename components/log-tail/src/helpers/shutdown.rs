//! Shutdown coordination between signal handlers and the runner.

// External crates
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Why the process was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM (Unix only).
    Terminate,
}

/// Process-wide shutdown handle, built on-top of a `CancellationToken`
///
/// - The runner receives a clone of the token via `.token()` and waits on
/// `.cancelled()` alongside its other stop conditions.
/// - `.listen_for_signals()` turns SIGINT/SIGTERM into a `.trigger()`.
/// - Triggering is idempotent; every clone of the token observes it.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Creates a new, untriggered shutdown handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token that is cancelled when shutdown is triggered.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger shutdown, releasing every waiter.
    #[instrument(
        name = "log_tail_shutdown_trigger",
        target = "helpers::shutdown",
        skip_all,
        level = "trace"
    )]
    pub fn trigger(&self) {
        tracing::trace!("Shutdown triggered");
        self.token.cancel();
    }

    /// Spawn a background task that triggers shutdown on the first
    /// interrupt or termination signal.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = wait_for_signal() => {
                    tracing::debug!(signal = ?signal, "Received shutdown signal");
                    shutdown.trigger();
                }
                _ = shutdown.token.cancelled() => {}
            }
        })
    }
}

async fn wait_for_signal() -> ShutdownSignal {
    tokio::select! {
        signal = wait_ctrl_c() => signal,
        signal = wait_sigterm() => signal,
    }
}

async fn wait_ctrl_c() -> ShutdownSignal {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Unable to listen for interrupt signal");
        std::future::pending::<()>().await;
    }
    ShutdownSignal::Interrupt
}

#[cfg(unix)]
async fn wait_sigterm() -> ShutdownSignal {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "Unable to listen for termination signal");
            std::future::pending::<()>().await;
        }
    }
    ShutdownSignal::Terminate
}

// No SIGTERM outside Unix; this arm never fires.
#[cfg(not(unix))]
async fn wait_sigterm() -> ShutdownSignal {
    std::future::pending::<ShutdownSignal>().await
}
