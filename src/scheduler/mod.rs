//! Job scheduling over the record stores.
//!
//! The [`Scheduler`] is the only component with behavior: it creates jobs
//! (idempotently, keyed by content hash), hands queued jobs to polling
//! workers under label affinity, relays cooperative cancellation, ingests
//! and serves job output, and reaps workers that stop polling.
//!
//! # Dispatch
//!
//! Workers are never pushed to. Each poll refreshes the worker's record and
//! may claim up to its spare capacity in queued jobs. A claim is a
//! compare-and-swap on the job status (`CREATED -> RUNNING`) performed under
//! the job store's write lock, so two workers racing for the same job cannot
//! both win.
//!
//! # Retention
//!
//! Once a job is terminal and has output, a one-shot purge is armed on the
//! [`TaskRuntime`]. Purges are idempotent and skip jobs that became active
//! again in the meantime. Each armed purge carries a generation; recreating
//! a canceled job disarms it, so a timer left over from the previous run
//! never cuts short the retention of the next one.

pub mod job;
pub mod reaper;
pub mod secret;

pub use job::{Job, JobInfo, JobStatus};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::labels::LabelJobs;
use crate::store::{JobStore, OutputChunk, OutputStore, Scope, WorkerRecord, WorkerRegistry};
use crate::tasks::{OnShutdown, TaskRuntime};

/// What a worker reports on each poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollRequest {
    pub labels: BTreeSet<String>,
    pub available_capacity: usize,
    /// Jobs the worker is currently executing.
    pub running_hashes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    pub jobs_to_start: Vec<String>,
    pub jobs_to_cancel: Vec<String>,
    pub label_jobs: HashMap<String, String>,
    pub refresh_period_ms: u64,
}

/// A single output chunk posted by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputWrite {
    pub output_number: u64,
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
    jobs: Arc<RwLock<JobStore>>,
    workers: Arc<RwLock<WorkerRegistry>>,
    outputs: Arc<RwLock<OutputStore>>,
    label_jobs: LabelJobs,
    tasks: TaskRuntime,
    purge_timers: Arc<Mutex<PurgeTimers>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, label_jobs: LabelJobs, tasks: TaskRuntime) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(JobStore::with_capacity(config.max_jobs))),
            workers: Arc::new(RwLock::new(WorkerRegistry::new())),
            outputs: Arc::new(RwLock::new(OutputStore::new())),
            config,
            label_jobs,
            tasks,
            purge_timers: Arc::new(Mutex::new(PurgeTimers::default())),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn tasks(&self) -> &TaskRuntime {
        &self.tasks
    }

    fn scope(&self, caller_id: &str) -> Scope {
        if self.config.authorization {
            Scope::Owner(caller_id.to_string())
        } else {
            Scope::All
        }
    }

    /// Visible jobs keyed by hash, secrets redacted.
    pub async fn list(&self, caller_id: &str, status: Option<JobStatus>) -> BTreeMap<String, Job> {
        let scope = self.scope(caller_id);
        self.jobs
            .read()
            .await
            .list(&scope, status)
            .into_iter()
            .map(|j| (j.hash.clone(), j.redacted()))
            .collect()
    }

    pub async fn info(&self, caller_id: &str, hash: &str) -> Result<Job> {
        let scope = self.scope(caller_id);
        self.jobs
            .read()
            .await
            .get_visible(hash, &scope)
            .map(Job::redacted)
            .ok_or_else(|| SchedulerError::NotFound(hash.to_string()))
    }

    /// Create a job, or return the existing one for the same hash.
    ///
    /// Only a fresh insert (or the recreation of a canceled job) returns the
    /// cancellation secret. A canceled job is recreated in place: its output
    /// is purged and it gets a new secret.
    pub async fn create_job(&self, caller_id: &str, info: JobInfo) -> Result<Job> {
        let hash = require_hash(info.hash.as_deref())?;
        let now = Utc::now();

        let mut jobs = self.jobs.write().await;
        match jobs.get(&hash).map(|j| j.status) {
            Some(JobStatus::Canceled) => {
                let purged = self.outputs.write().await.purge(&hash);
                self.purge_timers().disarm(&hash);
                let job = Job::new(hash.clone(), caller_id, info.labels, secret::generate(), now);
                jobs.overwrite(job.clone());
                tracing::info!(job_hash = %hash, purged_chunks = purged, "Canceled job recreated");
                Ok(job)
            }
            Some(_) => {
                let job = jobs
                    .get_visible_mut(&hash, &Scope::All)
                    .ok_or_else(|| SchedulerError::Internal(format!("job {} vanished", hash)))?;
                if job.owner_ids.insert(caller_id.to_string()) {
                    tracing::debug!(job_hash = %hash, caller_id, "Caller added as job owner");
                }
                Ok(job.redacted())
            }
            None => {
                if jobs.is_full() {
                    tracing::warn!(job_hash = %hash, "Job store at capacity, job rejected");
                    return Err(SchedulerError::Internal("job store at capacity".to_string()));
                }
                let job = Job::new(hash.clone(), caller_id, info.labels, secret::generate(), now);
                jobs.insert(job.clone());
                tracing::info!(job_hash = %hash, caller_id, labels = ?job.labels, "Job created");
                Ok(job)
            }
        }
    }

    /// Merge the non-empty fields of `info` onto the stored job.
    pub async fn update_job(&self, caller_id: &str, info: JobInfo) -> Result<()> {
        let hash = require_hash(info.hash.as_deref())?;
        let scope = self.scope(caller_id);

        let arm_purge = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_visible_mut(&hash, &scope)
                .ok_or_else(|| SchedulerError::NotFound(hash.clone()))?;

            if let Some(status) = info.status {
                if job.status.is_terminal() && status != job.status {
                    return Err(SchedulerError::Invalid(format!(
                        "job {} is already {}",
                        hash, job.status
                    )));
                }
                job.status = status;
            }
            if let Some(worker) = info.worker.filter(|w| !w.is_empty()) {
                job.worker = Some(worker);
            }
            if !info.labels.is_empty() {
                job.labels = info.labels;
            }
            if info.start_time.is_some() {
                job.start_time = info.start_time;
            }
            if info.end_time.is_some() {
                job.end_time = info.end_time;
            }
            if job.status.is_terminal() && job.end_time.is_none() {
                job.end_time = Some(Utc::now());
            }

            tracing::debug!(job_hash = %hash, status = %job.status, "Job updated");
            job.status.is_terminal() && job.output_number.is_some()
        };

        if arm_purge {
            self.arm_output_purge(hash);
        }
        Ok(())
    }

    /// Request cooperative cancellation. The presented secret must match the
    /// one issued at creation. Terminal jobs are left alone; otherwise only the
    /// flag is set and the worker holding the job stops it.
    pub async fn cancel_job(&self, caller_id: &str, hash: &str, presented: &str) -> Result<()> {
        let scope = self.scope(caller_id);
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_visible_mut(hash, &scope)
            .ok_or_else(|| SchedulerError::NotFound(hash.to_string()))?;

        match job.secret.as_deref() {
            Some(expected) if secret::matches(expected, presented) => {}
            _ => {
                tracing::warn!(job_hash = %hash, caller_id, "Cancellation rejected, secret mismatch");
                return Err(SchedulerError::Unauthorized(
                    "cancellation secret does not match".to_string(),
                ));
            }
        }

        if job.status.is_terminal() {
            tracing::debug!(job_hash = %hash, status = %job.status, "Cancel on finished job ignored");
            return Ok(());
        }

        job.cancel_requested = true;
        tracing::info!(job_hash = %hash, status = %job.status, worker = ?job.worker, "Job cancellation requested");
        Ok(())
    }

    /// The subset of `hashes` whose cancellation has been requested.
    pub async fn get_canceled_jobs(&self, caller_id: &str, hashes: &[String]) -> Vec<String> {
        let scope = self.scope(caller_id);
        self.jobs.read().await.cancel_requested(&scope, hashes)
    }

    /// Append an output chunk. Returns the number of jobs matched: 0 means
    /// the job is gone (or not visible) and the chunk was dropped.
    pub async fn update_job_output(&self, caller_id: &str, hash: &str, write: OutputWrite) -> Result<u64> {
        let scope = self.scope(caller_id);

        let arm_purge = {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.get_visible(hash, &scope) else {
                tracing::debug!(job_hash = %hash, "Output for unknown job dropped");
                return Ok(0);
            };
            let finished = job.status.is_terminal();

            let appended = self
                .outputs
                .write()
                .await
                .append(hash, write.output_number, write.payload);
            if !appended {
                tracing::debug!(job_hash = %hash, output_number = write.output_number, "Duplicate output chunk ignored");
            }
            jobs.record_output(hash, write.output_number);
            finished
        };

        // Late output for a finished job must not outlive retention either.
        if arm_purge {
            self.arm_output_purge(hash.to_string());
        }
        Ok(1)
    }

    /// Output chunks with `start <= output_number < end`, ascending.
    pub async fn get_job_output(
        &self,
        caller_id: &str,
        hash: &str,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<Vec<OutputChunk>> {
        let scope = self.scope(caller_id);
        let jobs = self.jobs.read().await;
        let outputs = self.outputs.read().await;

        let visible = jobs.get_visible(hash, &scope).is_some();
        if visible || (scope == Scope::All && outputs.has_output(hash)) {
            Ok(outputs.range(hash, start, end))
        } else {
            Err(SchedulerError::NotFound(hash.to_string()))
        }
    }

    /// Register or refresh a worker.
    pub async fn update_worker(
        &self,
        caller_id: &str,
        worker_id: &str,
        labels: BTreeSet<String>,
    ) -> Result<WorkerRecord> {
        require_worker_id(worker_id)?;
        let record = self
            .workers
            .write()
            .await
            .upsert(worker_id, labels, caller_id, Utc::now())
            .clone();
        Ok(record)
    }

    /// Claim up to `capacity` queued jobs whose labels `labels` covers.
    /// Only hashes whose claim actually succeeded are returned.
    pub async fn start_queued_jobs(
        &self,
        caller_id: &str,
        worker_id: &str,
        labels: &BTreeSet<String>,
        capacity: usize,
    ) -> Result<Vec<String>> {
        require_worker_id(worker_id)?;
        if capacity == 0 {
            return Ok(Vec::new());
        }

        let scope = self.scope(caller_id);
        let candidates = self.jobs.read().await.claimable(&scope, labels, capacity);

        let mut started = Vec::with_capacity(candidates.len());
        for hash in candidates {
            if self.jobs.write().await.claim(&hash, worker_id, Utc::now()) {
                tracing::info!(job_hash = %hash, worker_id, "Job claimed");
                started.push(hash);
            } else {
                tracing::debug!(job_hash = %hash, worker_id, "Job claimed by another worker first");
            }
        }
        Ok(started)
    }

    /// Handle one worker poll: refresh liveness, hand out new work, and report
    /// cancellations among the worker's running jobs and the ones just started.
    pub async fn poll_worker(
        &self,
        caller_id: &str,
        worker_id: &str,
        request: PollRequest,
    ) -> Result<PollResponse> {
        let record = self.update_worker(caller_id, worker_id, request.labels).await?;
        let jobs_to_start = self
            .start_queued_jobs(caller_id, worker_id, &record.labels, request.available_capacity)
            .await?;

        // A job canceled while queued is still dispatched; flag it in the same
        // response so the worker can drop it right away.
        let mut held = request.running_hashes;
        held.extend(jobs_to_start.iter().cloned());
        let jobs_to_cancel = self.get_canceled_jobs(caller_id, &held).await;

        Ok(PollResponse {
            jobs_to_start,
            jobs_to_cancel,
            label_jobs: self.label_jobs.snapshot().await,
            refresh_period_ms: self.config.refresh_interval_ms,
        })
    }

    pub async fn list_workers(&self, caller_id: &str) -> Vec<WorkerRecord> {
        let scope = self.scope(caller_id);
        self.workers
            .read()
            .await
            .list(&scope)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Remove workers silent since before `now - stale_after` and requeue
    /// their unfinished jobs. Returns the number of workers reaped.
    pub async fn reap_stale_workers(&self, now: DateTime<Utc>) -> usize {
        let stale_after = match chrono::Duration::from_std(self.config.stale_after()) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "Worker staleness window out of range, skipping sweep");
                return 0;
            }
        };
        let cutoff = now - stale_after;

        // The registry stays locked until the requeue is done, so a worker
        // re-registering mid-sweep cannot have its fresh claims reset.
        let mut workers = self.workers.write().await;
        let stale = workers.remove_stale(cutoff);
        if stale.is_empty() {
            return 0;
        }

        let mut jobs = self.jobs.write().await;
        for worker in &stale {
            let requeued = jobs.requeue_worker_jobs(&worker.client_id);
            tracing::info!(
                worker_id = %worker.client_id,
                last_seen = %worker.last_seen,
                requeued = ?requeued,
                "Stale worker reaped"
            );
        }
        stale.len()
    }

    /// Delete a finished job's output and clear its output counter.
    /// Does nothing if the job has become active again.
    pub async fn purge_finished_output(&self, hash: &str) -> usize {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get(hash) {
            if !job.status.is_terminal() {
                tracing::debug!(job_hash = %hash, status = %job.status, "Purge skipped, job is active");
                return 0;
            }
        }

        let purged = self.outputs.write().await.purge(hash);
        jobs.clear_output(hash);
        if purged > 0 {
            tracing::info!(job_hash = %hash, chunks = purged, "Job output purged");
        }
        purged
    }

    fn purge_timers(&self) -> MutexGuard<'_, PurgeTimers> {
        self.purge_timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn arm_output_purge(&self, hash: String) {
        let Some(delay) = self.config.clear_output_timeout() else {
            return;
        };
        let Some(generation) = self.purge_timers().arm(&hash) else {
            return;
        };

        let on_shutdown = if self.config.drain_purges_on_shutdown {
            OnShutdown::RunNow
        } else {
            OnShutdown::Abandon
        };
        tracing::debug!(job_hash = %hash, generation, delay_ms = delay.as_millis() as u64, "Output purge armed");

        let scheduler = self.clone();
        self.tasks.schedule_after(delay, on_shutdown, async move {
            let current = scheduler.purge_timers().fire(&hash, generation);
            if !current {
                tracing::debug!(job_hash = %hash, generation, "Superseded output purge dropped");
                return;
            }
            scheduler.purge_finished_output(&hash).await;
        });
    }

    /// Start the worker reaper on this scheduler's task runtime.
    pub fn spawn_reaper(&self) {
        reaper::spawn(self.clone());
    }
}

/// Pending purge timers keyed by job hash.
#[derive(Debug, Default)]
struct PurgeTimers {
    next_generation: u64,
    armed: HashMap<String, u64>,
}

impl PurgeTimers {
    /// Arm a timer for `hash` unless one is already pending. Returns the new
    /// timer's generation.
    fn arm(&mut self, hash: &str) -> Option<u64> {
        if self.armed.contains_key(hash) {
            return None;
        }
        self.next_generation += 1;
        self.armed.insert(hash.to_string(), self.next_generation);
        Some(self.next_generation)
    }

    /// Consume the pending entry if `generation` is still the current one.
    fn fire(&mut self, hash: &str, generation: u64) -> bool {
        if self.armed.get(hash) != Some(&generation) {
            return false;
        }
        self.armed.remove(hash);
        true
    }

    fn disarm(&mut self, hash: &str) {
        self.armed.remove(hash);
    }
}

fn require_hash(hash: Option<&str>) -> Result<String> {
    match hash.map(str::trim) {
        Some(h) if !h.is_empty() => Ok(h.to_string()),
        _ => Err(SchedulerError::Invalid("job hash is required".to_string())),
    }
}

fn require_worker_id(worker_id: &str) -> Result<()> {
    if worker_id.trim().is_empty() {
        return Err(SchedulerError::Invalid("worker id is required".to_string()));
    }
    Ok(())
}
