use async_trait::async_trait;
use log::{debug, error};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;

use crate::utils::error::SlaveError;

/// Destination for serialized snapshots.
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn write(&self, document: &str) -> Result<(), SlaveError>;
    fn sink_type(&self) -> &str;
    fn destination(&self) -> &str;
}

/// Writes each snapshot to a file, replacing the previous one atomically.
pub struct FileSink {
    path: PathBuf,
    display: String,
}

impl FileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            display: path.to_string_lossy().to_string(),
            path,
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotSink for FileSink {
    async fn write(&self, document: &str) -> Result<(), SlaveError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    SlaveError::SnapshotFailure(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        // Write next to the target and rename over it, so a failed write never
        // leaves a truncated snapshot behind.
        let temp = self.temp_path();
        if let Err(e) = fs::write(&temp, document.as_bytes()).await {
            error!("❌ Failed to write snapshot {}: {}", temp.display(), e);
            let _ = fs::remove_file(&temp).await;
            return Err(SlaveError::SnapshotFailure(format!("write {}: {}", temp.display(), e)));
        }
        fs::rename(&temp, &self.path).await.map_err(|e| {
            error!("❌ Failed to replace snapshot {}: {}", self.display, e);
            SlaveError::SnapshotFailure(format!("rename to {}: {}", self.display, e))
        })?;

        debug!("📝 Snapshot written to {} ({} bytes)", self.display, document.len());
        Ok(())
    }

    fn sink_type(&self) -> &str {
        "file"
    }

    fn destination(&self) -> &str {
        &self.display
    }
}

/// Keeps every snapshot in memory. Used when no file is configured and by tests.
#[derive(Default)]
pub struct MemorySink {
    documents: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<String> {
        self.documents
            .lock()
            .map(|docs| docs.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<String> {
        self.documents.lock().ok().and_then(|docs| docs.last().cloned())
    }
}

#[async_trait]
impl SnapshotSink for MemorySink {
    async fn write(&self, document: &str) -> Result<(), SlaveError> {
        let mut documents = self.documents.lock().map_err(|_| SlaveError::LockError)?;
        documents.push(document.to_string());
        Ok(())
    }

    fn sink_type(&self) -> &str {
        "memory"
    }

    fn destination(&self) -> &str {
        "memory"
    }
}
