//! Label to artifact mapping echoed to workers in poll responses.
//!
//! The map is owned by whoever watches the backing file; the scheduler only
//! takes snapshots of it. Nothing here influences dispatch.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum LabelJobsError {
    #[error("Label jobs file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Label jobs file is not a JSON object of strings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Shared, swappable label-to-artifact cache.
#[derive(Debug, Clone, Default)]
pub struct LabelJobs {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl LabelJobs {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Build a cache from a JSON object file such as `{"gpu": "cuda-runner:12"}`.
    pub async fn load(path: &Path) -> Result<Self, LabelJobsError> {
        Ok(Self::new(Self::read_file(path).await?))
    }

    /// Re-read the file and swap the contents in. On error the current map is kept.
    pub async fn reload(&self, path: &Path) -> Result<usize, LabelJobsError> {
        let map = Self::read_file(path).await?;
        let count = map.len();
        self.replace(map).await;
        Ok(count)
    }

    pub async fn replace(&self, map: HashMap<String, String>) {
        *self.inner.write().await = map;
    }

    pub async fn snapshot(&self) -> HashMap<String, String> {
        self.inner.read().await.clone()
    }

    async fn read_file(path: &Path) -> Result<HashMap<String, String>, LabelJobsError> {
        let raw = fs::read(path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => LabelJobsError::NotFound(path.to_path_buf()),
            _ => LabelJobsError::Io(e),
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }
}
