use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::scheduler::job::{Job, JobStatus};
use crate::store::Scope;

const DEFAULT_MAX_JOBS: usize = 10_000;

/// Job records keyed by content hash.
#[derive(Debug)]
pub struct JobStore {
    jobs: HashMap<String, Job>,
    max_jobs: usize,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            max_jobs,
        }
    }

    /// Insert a job under a hash not yet present. Returns false if the hash
    /// is taken or the store is at capacity.
    pub fn insert(&mut self, job: Job) -> bool {
        if self.jobs.contains_key(&job.hash) || self.jobs.len() >= self.max_jobs {
            return false;
        }
        self.jobs.insert(job.hash.clone(), job);
        true
    }

    /// Overwrite an existing record in place. Returns false if the hash is unknown.
    pub fn overwrite(&mut self, job: Job) -> bool {
        match self.jobs.get_mut(&job.hash) {
            Some(slot) => {
                *slot = job;
                true
            }
            None => false,
        }
    }

    /// Unscoped lookup, for the store's own bookkeeping.
    pub fn get(&self, hash: &str) -> Option<&Job> {
        self.jobs.get(hash)
    }

    pub fn get_visible(&self, hash: &str, scope: &Scope) -> Option<&Job> {
        self.jobs.get(hash).filter(|j| scope.permits(&j.owner_ids))
    }

    pub fn get_visible_mut(&mut self, hash: &str, scope: &Scope) -> Option<&mut Job> {
        self.jobs
            .get_mut(hash)
            .filter(|j| scope.permits(&j.owner_ids))
    }

    /// Visible jobs, optionally filtered by status, oldest first.
    pub fn list(&self, scope: &Scope, status: Option<JobStatus>) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self
            .jobs
            .values()
            .filter(|j| scope.permits(&j.owner_ids))
            .filter(|j| status.map_or(true, |s| j.status == s))
            .collect();
        jobs.sort_by(|a, b| {
            a.create_time
                .cmp(&b.create_time)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        jobs
    }

    /// Hashes of up to `limit` queued jobs a worker with `labels` may run,
    /// oldest first.
    pub fn claimable(&self, scope: &Scope, labels: &BTreeSet<String>, limit: usize) -> Vec<String> {
        self.list(scope, Some(JobStatus::Created))
            .into_iter()
            .filter(|j| j.runnable_on(labels))
            .take(limit)
            .map(|j| j.hash.clone())
            .collect()
    }

    /// Flip `CREATED -> RUNNING` for `worker_id`, but only if the job is
    /// still `CREATED`. Returns whether the swap happened.
    pub fn claim(&mut self, hash: &str, worker_id: &str, now: DateTime<Utc>) -> bool {
        match self.jobs.get_mut(hash) {
            Some(job) if job.status == JobStatus::Created => {
                job.status = JobStatus::Running;
                job.worker = Some(worker_id.to_string());
                job.start_time = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Requeue every unfinished job assigned to `worker_id`. Returns the
    /// hashes that were reset.
    pub fn requeue_worker_jobs(&mut self, worker_id: &str) -> Vec<String> {
        let mut reset = Vec::new();
        for job in self.jobs.values_mut() {
            if job.worker.as_deref() == Some(worker_id) && !job.status.is_terminal() {
                job.requeue();
                reset.push(job.hash.clone());
            }
        }
        reset.sort();
        reset
    }

    /// The subset of `hashes` that are visible and have cancellation requested.
    pub fn cancel_requested(&self, scope: &Scope, hashes: &[String]) -> Vec<String> {
        hashes
            .iter()
            .filter(|h| {
                self.get_visible(h, scope)
                    .is_some_and(|j| j.cancel_requested)
            })
            .cloned()
            .collect()
    }

    /// Raise the job's output counter to at least `output_number`.
    pub fn record_output(&mut self, hash: &str, output_number: u64) {
        if let Some(job) = self.jobs.get_mut(hash) {
            job.output_number = Some(job.output_number.map_or(output_number, |n| n.max(output_number)));
        }
    }

    pub fn clear_output(&mut self, hash: &str) {
        if let Some(job) = self.jobs.get_mut(hash) {
            job.output_number = None;
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }
}
