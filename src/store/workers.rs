use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Scope;

/// Liveness record for a polling worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub client_id: String,
    pub labels: BTreeSet<String>,
    pub last_seen: DateTime<Utc>,
    pub owner_ids: BTreeSet<String>,
}

impl WorkerRecord {
    pub fn new(client_id: String, labels: BTreeSet<String>, owner_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            client_id,
            labels,
            last_seen: now,
            owner_ids: BTreeSet::from([owner_id.to_string()]),
        }
    }

    pub fn is_alive(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen >= cutoff
    }
}

/// Workers keyed by client id
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, WorkerRecord>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker or refresh its labels and last-seen time.
    pub fn upsert(
        &mut self,
        client_id: &str,
        labels: BTreeSet<String>,
        owner_id: &str,
        now: DateTime<Utc>,
    ) -> &WorkerRecord {
        self.workers
            .entry(client_id.to_string())
            .and_modify(|w| {
                w.labels = labels.clone();
                w.last_seen = now;
                w.owner_ids.insert(owner_id.to_string());
            })
            .or_insert_with(|| {
                tracing::info!(worker_id = client_id, "Worker registered");
                WorkerRecord::new(client_id.to_string(), labels, owner_id, now)
            })
    }

    pub fn get(&self, client_id: &str) -> Option<&WorkerRecord> {
        self.workers.get(client_id)
    }

    /// Visible workers, sorted by id.
    pub fn list(&self, scope: &Scope) -> Vec<&WorkerRecord> {
        let mut workers: Vec<&WorkerRecord> = self
            .workers
            .values()
            .filter(|w| scope.permits(&w.owner_ids))
            .collect();
        workers.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        workers
    }

    /// Remove and return every worker last seen before `cutoff`.
    pub fn remove_stale(&mut self, cutoff: DateTime<Utc>) -> Vec<WorkerRecord> {
        let stale: Vec<String> = self
            .workers
            .values()
            .filter(|w| !w.is_alive(cutoff))
            .map(|w| w.client_id.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|id| self.workers.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
