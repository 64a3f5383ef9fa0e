//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long to wait for tracked tasks before giving up.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates shutdown of the listener and the bot sweeper.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token and give `handles` until `timeout` (default
    /// [`DEFAULT_SHUTDOWN_TIMEOUT`]) to finish. Tasks still running at the
    /// deadline are aborted.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let deadline = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        let aborts: Vec<AbortHandle> = handles.iter().map(JoinHandle::abort_handle).collect();

        self.shutdown();
        debug!(tasks = aborts.len(), ?deadline, "draining relay tasks");

        match tokio::time::timeout(deadline, futures::future::join_all(handles)).await {
            Ok(results) => {
                let panicked = results
                    .iter()
                    .filter(|r| r.as_ref().is_err_and(JoinError::is_panic))
                    .count();
                if panicked > 0 {
                    warn!(panicked, "relay tasks panicked before shutdown");
                }
            }
            Err(_) => {
                let mut aborted = 0_usize;
                for task in aborts.iter().filter(|t| !t.is_finished()) {
                    task.abort();
                    aborted += 1;
                }
                warn!(aborted, ?deadline, "relay tasks missed the shutdown deadline");
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
