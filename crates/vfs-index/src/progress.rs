//! Build progress record and where it is persisted.
//!
//! There is a single progress record per process. Every emission overwrites
//! it; the terminal record (`is_done = true`) is the last write of a build.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::write_atomic;
use crate::error::{IndexError, Result};

pub const INTERRUPTED_BUILD_ERROR: &str = "the index build was interrupted";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProgress {
    pub object_count: u64,
    pub is_done: bool,
    pub last_done_time: Option<DateTime<Utc>>,
    /// First error seen by the build; empty when it finished cleanly.
    #[serde(default)]
    pub error: String,
}

impl BuildProgress {
    pub fn running(object_count: u64) -> Self {
        Self {
            object_count,
            ..Self::default()
        }
    }

    pub fn finished(object_count: u64, error: Option<String>) -> Self {
        Self {
            object_count,
            is_done: true,
            last_done_time: Some(Utc::now()),
            error: error.unwrap_or_default(),
        }
    }

    /// Finished, but with errors along the way.
    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn write(&self, progress: &BuildProgress) -> Result<()>;

    /// The last written record, or the default (not done, zero objects).
    async fn read(&self) -> Result<BuildProgress>;
}

/// Rewrites a record left unfinished by a process that died mid-build.
///
/// Returns true if the record was rewritten.
pub async fn recover_interrupted(store: &dyn ProgressStore) -> Result<bool> {
    let progress = store.read().await?;
    if progress.is_done || progress == BuildProgress::default() {
        return Ok(false);
    }
    log::warn!(
        "index progress left unfinished at {} objects, marking as interrupted",
        progress.object_count
    );
    let recovered = BuildProgress {
        is_done: true,
        error: INTERRUPTED_BUILD_ERROR.to_string(),
        ..progress
    };
    store.write(&recovered).await?;
    Ok(true)
}

#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    current: RwLock<Option<BuildProgress>>,
    writes: RwLock<Vec<BuildProgress>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record written so far, oldest first.
    pub fn history(&self) -> Vec<BuildProgress> {
        self.writes.read().clone()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn write(&self, progress: &BuildProgress) -> Result<()> {
        *self.current.write() = Some(progress.clone());
        self.writes.write().push(progress.clone());
        Ok(())
    }

    async fn read(&self) -> Result<BuildProgress> {
        Ok(self.current.read().clone().unwrap_or_default())
    }
}

/// Progress persisted as a JSON file.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    path: PathBuf,
    // Writers share one temp file.
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl FileProgressStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

#[async_trait]
impl ProgressStore for FileProgressStore {
    async fn write(&self, progress: &BuildProgress) -> Result<()> {
        let json = serde_json::to_vec(progress)?;
        let path = self.path.clone();
        let _guard = self.write_lock.lock().await;
        tokio::task::spawn_blocking(move || write_atomic(&path, &json))
            .await
            .map_err(|error| IndexError::Internal(format!("progress write task failed: {error}")))?
    }

    async fn read(&self) -> Result<BuildProgress> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(BuildProgress::default()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn memory_store_overwrites_and_keeps_history() {
        let store = MemoryProgressStore::new();
        assert_eq!(store.read().await.expect("read"), BuildProgress::default());

        store.write(&BuildProgress::running(5)).await.expect("write");
        store
            .write(&BuildProgress::finished(7, None))
            .await
            .expect("write");

        let current = store.read().await.expect("read");
        assert!(current.is_done);
        assert_eq!(current.object_count, 7);
        assert!(!current.has_error());
        assert_eq!(store.history().len(), 2);
    }

    #[tokio::test]
    async fn file_store_round_trips() {
        let temp = TempDir::new().expect("tempdir");
        let store = FileProgressStore::new(temp.path().join("progress.json"));
        assert_eq!(store.read().await.expect("read"), BuildProgress::default());

        let finished = BuildProgress::finished(3, Some("backend down".into()));
        store.write(&finished).await.expect("write");
        let read = store.read().await.expect("read");
        assert_eq!(read, finished);
        assert!(read.has_error());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn file_store_serialises_concurrent_writes_off_the_runtime() {
        let temp = TempDir::new().expect("tempdir");
        let store = Arc::new(FileProgressStore::new(temp.path().join("nested/progress.json")));

        let writers: Vec<_> = (0..8u64)
            .map(|count| {
                let store = store.clone();
                tokio::spawn(async move { store.write(&BuildProgress::running(count)).await })
            })
            .collect();
        for writer in writers {
            writer.await.expect("join").expect("write");
        }

        let read = store.read().await.expect("read");
        assert!(!read.is_done);
        assert!(read.object_count < 8);
    }

    #[tokio::test]
    async fn recover_marks_unfinished_build() {
        let store = MemoryProgressStore::new();
        assert!(!recover_interrupted(&store).await.expect("recover"));

        store.write(&BuildProgress::running(42)).await.expect("write");
        assert!(recover_interrupted(&store).await.expect("recover"));

        let progress = store.read().await.expect("read");
        assert!(progress.is_done);
        assert_eq!(progress.object_count, 42);
        assert_eq!(progress.error, INTERRUPTED_BUILD_ERROR);
        assert!(!recover_interrupted(&store).await.expect("second recover"));
    }
}
