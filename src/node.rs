use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::ServerConfig;
use crate::labels::LabelJobs;
use crate::scheduler::Scheduler;
use crate::tasks::TaskRuntime;

/// Server node tying the scheduler, its background tasks and the API together
pub struct Node {
    pub config: ServerConfig,
    pub scheduler: Scheduler,
    pub tasks: TaskRuntime,
    shutdown: CancellationToken,
}

impl Node {
    pub fn new(config: ServerConfig, label_jobs: LabelJobs, shutdown: CancellationToken) -> Self {
        // Background tasks have their own token so they are stopped only
        // after the API has finished draining requests.
        let tasks = TaskRuntime::new(CancellationToken::new());
        let scheduler = Scheduler::new(config.scheduler.clone(), label_jobs, tasks.clone());

        Self {
            config,
            scheduler,
            tasks,
            shutdown,
        }
    }

    /// Run the node until the shutdown token is cancelled.
    ///
    /// 1. Spawns the worker reaper
    /// 2. Serves the HTTP API (blocking) with graceful shutdown
    /// 3. Stops background tasks, abandoning or draining pending output
    ///    purges per configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be bound or the server
    /// fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.scheduler.spawn_reaper();

        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let state = ApiState::new(self.scheduler.clone(), self.config.worker_secret.clone());
        let served = api::serve(listener, state, self.shutdown.clone()).await;

        tracing::info!(
            pending_tasks = self.tasks.pending(),
            drain_purges = self.config.scheduler.drain_purges_on_shutdown,
            "API stopped, shutting down background tasks"
        );
        self.tasks.shutdown().await;

        served?;
        Ok(())
    }
}
