use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Created,
    Running,
    Success,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Created => write!(f, "CREATED"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Success => write!(f, "SUCCESS"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Canceled => write!(f, "CANCELED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub hash: String,
    pub status: JobStatus,
    pub owner_ids: BTreeSet<String>,
    /// Cancellation capability. Only handed out by the creating call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub worker: Option<String>,
    pub labels: BTreeSet<String>,
    pub cancel_requested: bool,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub output_number: Option<u64>,
}

impl Job {
    pub fn new(
        hash: String,
        owner_id: &str,
        labels: BTreeSet<String>,
        secret: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            hash,
            status: JobStatus::Created,
            owner_ids: BTreeSet::from([owner_id.to_string()]),
            secret: Some(secret),
            worker: None,
            labels,
            cancel_requested: false,
            create_time: created_at,
            start_time: None,
            end_time: None,
            output_number: None,
        }
    }

    /// Copy of the record safe to return to anyone but its creator.
    pub fn redacted(&self) -> Self {
        Self {
            secret: None,
            ..self.clone()
        }
    }

    /// A worker holding `worker_labels` may run this job.
    pub fn runnable_on(&self, worker_labels: &BTreeSet<String>) -> bool {
        self.labels.is_subset(worker_labels)
    }

    /// Put the job back in the queue, forgetting its assignee. A pending
    /// cancel request is kept and reaches the next worker.
    pub fn requeue(&mut self) {
        self.status = JobStatus::Created;
        self.worker = None;
        self.start_time = None;
    }
}

/// Sparse job body used for creation and status reports.
///
/// Absent (`None`) or empty fields leave the stored record untouched on
/// update. The secret, owners, cancellation flag and output counter are
/// server-controlled and cannot be set through this type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobInfo {
    pub hash: Option<String>,
    pub status: Option<JobStatus>,
    pub worker: Option<String>,
    pub labels: BTreeSet<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl JobInfo {
    pub fn with_hash(hash: impl Into<String>) -> Self {
        Self {
            hash: Some(hash.into()),
            ..Default::default()
        }
    }

    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Created.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
    }

    #[test]
    fn status_serializes_upper_case() {
        let json = serde_json::to_string(&JobStatus::Canceled).unwrap();
        assert_eq!(json, "\"CANCELED\"");
        let parsed: JobStatus = serde_json::from_str("\"RUNNING\"").unwrap();
        assert_eq!(parsed, JobStatus::Running);
    }

    #[test]
    fn unlabeled_job_runs_anywhere() {
        let job = Job::new("h".into(), "alice", BTreeSet::new(), "s".into(), Utc::now());
        assert!(job.runnable_on(&BTreeSet::new()));
        assert!(job.runnable_on(&labels(&["cpu"])));
    }

    #[test]
    fn labeled_job_needs_every_label() {
        let job = Job::new(
            "h".into(),
            "alice",
            labels(&["gpu", "linux"]),
            "s".into(),
            Utc::now(),
        );
        assert!(!job.runnable_on(&labels(&["gpu"])));
        assert!(job.runnable_on(&labels(&["gpu", "linux", "fast"])));
    }

    #[test]
    fn redacted_drops_secret_and_skips_field() {
        let job = Job::new("h".into(), "alice", BTreeSet::new(), "s".into(), Utc::now());
        let redacted = job.redacted();
        assert!(redacted.secret.is_none());
        let value = serde_json::to_value(&redacted).unwrap();
        assert!(value.get("secret").is_none());
    }
}
