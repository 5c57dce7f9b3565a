use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub job_hash: String,
    pub output_number: u64,
    pub payload: String,
}

/// Append-only output log per job, ordered by output number.
#[derive(Debug, Default)]
pub struct OutputStore {
    chunks: HashMap<String, BTreeMap<u64, String>>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a chunk. The first write for a given `(hash, output_number)` wins;
    /// returns false when the key was already present.
    pub fn append(&mut self, hash: &str, output_number: u64, payload: String) -> bool {
        let log = self.chunks.entry(hash.to_string()).or_default();
        if log.contains_key(&output_number) {
            return false;
        }
        log.insert(output_number, payload);
        true
    }

    /// Chunks with `start <= output_number < end`, ascending. Open bounds
    /// default to the whole log.
    pub fn range(&self, hash: &str, start: Option<u64>, end: Option<u64>) -> Vec<OutputChunk> {
        let Some(log) = self.chunks.get(hash) else {
            return Vec::new();
        };
        let start = start.unwrap_or(0);
        let end = end.unwrap_or(u64::MAX);
        if start >= end {
            return Vec::new();
        }

        log.range(start..end)
            .map(|(n, payload)| OutputChunk {
                job_hash: hash.to_string(),
                output_number: *n,
                payload: payload.clone(),
            })
            .collect()
    }

    pub fn has_output(&self, hash: &str) -> bool {
        self.chunks.get(hash).is_some_and(|log| !log.is_empty())
    }

    /// Delete every chunk for `hash`. Returns how many were removed; purging
    /// an already empty log is a no-op.
    pub fn purge(&mut self, hash: &str) -> usize {
        self.chunks.remove(hash).map_or(0, |log| log.len())
    }

    pub fn chunk_count(&self, hash: &str) -> usize {
        self.chunks.get(hash).map_or(0, |log| log.len())
    }
}
