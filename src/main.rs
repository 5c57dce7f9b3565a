use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use foreman_lite::config::{SchedulerConfig, ServerConfig};
use foreman_lite::labels::LabelJobs;
use foreman_lite::node::Node;
use foreman_lite::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "foreman-lite")]
#[command(version)]
#[command(about = "A content-addressed job scheduler for polling workers")]
struct Args {
    /// Address to bind the HTTP API to
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Scope jobs and workers to the callers that own them
    #[arg(long)]
    authorization: bool,

    /// How often workers should poll, in milliseconds
    #[arg(long, default_value = "5000")]
    refresh_interval_ms: u64,

    /// Delay before a finished job's output is purged, in milliseconds (-1 disables)
    #[arg(long, default_value = "60000", allow_hyphen_values = true)]
    clear_output_timeout_ms: i64,

    /// Maximum number of job records kept
    #[arg(long, default_value = "10000")]
    max_jobs: usize,

    /// Run pending output purges on shutdown instead of abandoning them
    #[arg(long)]
    drain_purges_on_shutdown: bool,

    /// Shared secret workers must send in the x-worker-secret header
    #[arg(long, env = "FOREMAN_WORKER_SECRET", hide_env_values = true)]
    worker_secret: Option<String>,

    /// JSON file mapping labels to artifact ids, echoed in poll responses
    #[arg(long)]
    label_jobs: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;

    let config = ServerConfig {
        listen_addr,
        worker_secret: args.worker_secret,
        label_jobs_path: args.label_jobs,
        scheduler: SchedulerConfig {
            authorization: args.authorization,
            refresh_interval_ms: args.refresh_interval_ms,
            clear_output_timeout_ms: args.clear_output_timeout_ms,
            max_jobs: args.max_jobs,
            drain_purges_on_shutdown: args.drain_purges_on_shutdown,
        },
    };

    if config.worker_secret.is_none() {
        tracing::warn!(
            "Running without a worker secret. \
             Consider --worker-secret for production deployments."
        );
    }

    let label_jobs = match &config.label_jobs_path {
        Some(path) => {
            let label_jobs = LabelJobs::load(path)
                .await
                .map_err(|e| format!("Failed to load label jobs from {}: {}", path.display(), e))?;
            tracing::info!(
                path = %path.display(),
                labels = label_jobs.snapshot().await.len(),
                "Label jobs loaded"
            );
            label_jobs
        }
        None => LabelJobs::default(),
    };

    tracing::info!(
        listen_addr = %config.listen_addr,
        authorization = config.scheduler.authorization,
        refresh_interval_ms = config.scheduler.refresh_interval_ms,
        clear_output_timeout_ms = config.scheduler.clear_output_timeout_ms,
        "Starting foreman-lite"
    );

    let shutdown = install_shutdown_handler();
    let node = Node::new(config, label_jobs, shutdown);
    node.run().await?;

    Ok(())
}
