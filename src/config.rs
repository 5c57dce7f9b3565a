use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Number of refresh intervals a worker may stay silent before it is reaped.
pub const STALE_WORKER_FACTOR: u32 = 5;

/// Scheduling and retention knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Scope every query to jobs the caller owns. When false all jobs are
    /// globally visible.
    pub authorization: bool,

    /// How often workers are told to poll. Also drives the reaper cadence.
    pub refresh_interval_ms: u64,

    /// Delay before a finished job's output is purged.
    /// `-1` disables retention purging entirely.
    pub clear_output_timeout_ms: i64,

    /// Maximum number of job records held by the job store.
    pub max_jobs: usize,

    /// Run pending output purges on shutdown instead of abandoning them.
    pub drain_purges_on_shutdown: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            authorization: false,
            refresh_interval_ms: 5_000,
            clear_output_timeout_ms: 60_000,
            max_jobs: 10_000,
            drain_purges_on_shutdown: false,
        }
    }
}

impl SchedulerConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// Silence after which a worker is considered dead.
    pub fn stale_after(&self) -> Duration {
        self.refresh_interval() * STALE_WORKER_FACTOR
    }

    /// Output retention delay, or `None` when purging is disabled.
    pub fn clear_output_timeout(&self) -> Option<Duration> {
        u64::try_from(self.clear_output_timeout_ms)
            .ok()
            .map(Duration::from_millis)
    }

    pub fn with_authorization(mut self, enabled: bool) -> Self {
        self.authorization = enabled;
        self
    }

    pub fn with_refresh_interval_ms(mut self, ms: u64) -> Self {
        self.refresh_interval_ms = ms;
        self
    }

    pub fn with_clear_output_timeout_ms(mut self, ms: i64) -> Self {
        self.clear_output_timeout_ms = ms;
        self
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Shared secret workers must present in `x-worker-secret`.
    /// Unrelated to per-job cancellation secrets.
    pub worker_secret: Option<String>,
    /// JSON file mapping label to artifact id, echoed in poll responses.
    pub label_jobs_path: Option<PathBuf>,
    pub scheduler: SchedulerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:8080"
                .parse()
                .expect("default listen address is valid"),
            worker_secret: None,
            label_jobs_path: None,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_worker_secret(mut self, secret: impl Into<String>) -> Self {
        self.worker_secret = Some(secret.into());
        self
    }
}
