//! JSON-lines record store.
//!
//! Each namespace gets its own file, `<directory>/<namespace>.jsonl`, holding
//! one serialised [`AvlRecord`] per line:
//!
//! ```text
//! {"timestamp":"2023-01-01T00:00:00Z","priority":1,"longitude":23.5,...}
//! ```
//!
//! The directory is created on first append.  Appends are serialised through
//! a mutex so concurrent sessions never interleave partial lines.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use avl_core::AvlRecord;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::application::forward_records::{RecordStore, StorageError};

/// File name stem used when a namespace key is empty.
const FALLBACK_NAMESPACE: &str = "unknown";

/// Appends records to per-namespace JSON-lines files.
#[derive(Debug)]
pub struct JsonlStore {
    directory: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file that holds `namespace`.
    pub fn path_for(&self, namespace: &str) -> PathBuf {
        let stem = if namespace.is_empty() {
            FALLBACK_NAMESPACE
        } else {
            namespace
        };
        self.directory.join(format!("{stem}.jsonl"))
    }
}

#[async_trait]
impl RecordStore for JsonlStore {
    async fn append(&self, namespace: &str, record: &AvlRecord) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let path = self.path_for(namespace);

        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| StorageError::Io {
                path: self.directory.clone(),
                source,
            })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;
        file.flush()
            .await
            .map_err(|source| StorageError::Io { path, source })?;
        Ok(())
    }
}
