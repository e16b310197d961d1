use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{signal, sync::broadcast, task::JoinHandle, time::timeout};

const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Coordinates shutdown across the server, the health monitor and any
/// background tasks. One broadcast channel, many subscribers; the first
/// trigger wins and later ones are ignored. After a trigger, in-flight
/// work gets at most `grace_period` to drain before it is abandoned.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<()>,
    shutdown_initiated: Arc<AtomicBool>,
    grace_period: Duration,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_GRACE_PERIOD)
    }

    pub fn with_timeout(grace_period: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            grace_period,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    pub fn trigger_shutdown(&self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!("shutdown triggered");
            let _ = self.shutdown_tx.send(());
        }
    }

    /// Future that resolves when a shutdown signal arrives, suitable for
    /// `axum::serve(...).with_graceful_shutdown`.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }

    /// Wait for `task` to finish, bounding the wait by the grace period
    /// once shutdown has been triggered. A task still running when the
    /// grace period elapses is aborted, so a single stuck connection
    /// (an idle WebSocket, say) cannot hang shutdown forever.
    ///
    /// Returns the task's output, or `None` if it was aborted.
    pub async fn drain<T>(&self, mut task: JoinHandle<T>) -> Option<T> {
        // Subscribe before checking the flag so a trigger landing
        // between the two is not missed.
        let mut rx = self.subscribe();
        if !self.is_shutdown_initiated() {
            tokio::select! {
                res = &mut task => return res.ok(),
                _ = rx.recv() => {}
            }
        }
        match timeout(self.grace_period, &mut task).await {
            Ok(res) => res.ok(),
            Err(_) => {
                tracing::warn!(
                    grace_secs = self.grace_period.as_secs(),
                    "grace period elapsed with work still in flight, aborting"
                );
                task.abort();
                let _ = task.await;
                None
            }
        }
    }

    /// Listen for SIGINT/SIGTERM and trigger shutdown on the first one.
    pub async fn run_signal_handler(&self) {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }
        self.trigger_shutdown();
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
