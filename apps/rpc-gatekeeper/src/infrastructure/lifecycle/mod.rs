//! Lifecycle Controller
//!
//! Owns the process-wide cancellation token and the long-lived tasks
//! started under it (dispatch loop, statistics timer, servers).
//!
//! Cancelling stops new subscriptions, lets the dispatch loop drain its
//! queue, stops the statistics timer, and ends every subscriber stream.
//! [`LifecycleController::shutdown`] cancels and then waits for all of
//! that to finish.

use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancellation signal plus the tasks that observe it.
#[derive(Debug, Default)]
pub struct LifecycleController {
    token: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl LifecycleController {
    /// Create a controller with a fresh token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle to the shared cancellation token.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a task that shutdown will wait for.
    ///
    /// The task must observe [`Self::token`] to stop on cancellation.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        self.tasks.lock().push((name, handle));
        tracing::debug!(task = name, "Lifecycle task spawned");
    }

    /// Signal cancellation. A second call is a no-op.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Cancellation requested");
            self.token.cancel();
        }
    }

    /// Check if cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for every spawned task to finish.
    ///
    /// Tasks already awaited by an earlier call are not awaited again.
    pub async fn shutdown(&self) {
        self.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (name, handle) in tasks {
            match handle.await {
                Ok(()) => tracing::debug!(task = name, "Lifecycle task finished"),
                Err(e) => tracing::error!(task = name, error = %e, "Lifecycle task failed"),
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
