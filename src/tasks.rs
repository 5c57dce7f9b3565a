//! Background task runtime.
//!
//! Long-running loops (the worker reaper) and one-shot deferred tasks (output
//! purges) are spawned through a [`TaskRuntime`] so that shutdown can cancel
//! them and wait for whatever is still in flight.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// What a deferred task does when shutdown arrives before its delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnShutdown {
    /// Drop the task without running it.
    Abandon,
    /// Run it immediately.
    RunNow,
}

#[derive(Debug, Clone)]
pub struct TaskRuntime {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl Default for TaskRuntime {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl TaskRuntime {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            token,
        }
    }

    /// Token cancelled when shutdown begins. Loops spawned with
    /// [`TaskRuntime::spawn`] must watch it.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, "Spawning background task");
        self.tracker.spawn(task);
    }

    /// Run `task` once after `delay`, unless shutdown intervenes.
    pub fn schedule_after<F>(&self, delay: Duration, on_shutdown: OnShutdown, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => task.await,
                _ = token.cancelled() => match on_shutdown {
                    OnShutdown::RunNow => task.await,
                    OnShutdown::Abandon => {
                        tracing::debug!("Deferred task abandoned on shutdown");
                    }
                },
            }
        });
    }

    /// Number of tasks still running or waiting.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel the token and wait for every tracked task to finish.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Background tasks stopped");
    }
}
