//! Forwarding decoded records to the storage collaborator.
//!
//! The supervisor never waits on storage before acknowledging a frame.  Each
//! session gets a background writer task fed by a bounded channel; the
//! supervisor offers each batch with `try_send` and moves on, and the writer
//! appends batches in arrival order.
//!
//! ```text
//! supervisor ──try_send──▶ channel(capacity) ──▶ writer task ──▶ RecordStore
//!      │                                              │
//!      └──▶ full: error!, counted                     └──▶ error! on failure
//! ```
//!
//! When the session ends, [`RecordForwarder::finish`] closes the channel and
//! waits for the writer to drain.  Its [`ForwardStats::failed`] counts both
//! failed appends and records dropped at a full queue.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use avl_core::AvlRecord;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

/// Error type for storage appends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend refused the append.
    #[error("storage backend rejected append to '{namespace}': {reason}")]
    Rejected { namespace: String, reason: String },

    /// A file system I/O error occurred.
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The record could not be serialised.
    #[error("failed to serialise record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The storage collaborator.
///
/// Implementations must tolerate uncoordinated concurrent appends from many
/// sessions.  Production uses the JSON-lines store; tests use the in-memory
/// store or a generated mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Appends one record under `namespace`.
    async fn append(&self, namespace: &str, record: &AvlRecord) -> Result<(), StorageError>;
}

/// Default number of batches a session may have waiting for the writer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Outcome counters of one session's appends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwardStats {
    pub stored: u64,
    /// Failed appends plus records dropped before reaching the writer.
    pub failed: u64,
}

struct Batch {
    namespace: String,
    records: Vec<AvlRecord>,
}

/// Per-session handle to the background writer.
pub struct RecordForwarder {
    batches: mpsc::Sender<Batch>,
    writer: JoinHandle<ForwardStats>,
    socket_id: Uuid,
    dropped: AtomicU64,
}

impl RecordForwarder {
    /// Spawns the writer task for session `socket_id` with room for
    /// `capacity` waiting batches (at least one).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(store: Arc<dyn RecordStore>, socket_id: Uuid, capacity: usize) -> Self {
        let (batches, rx) = mpsc::channel(capacity.max(1));
        let writer = tokio::spawn(write_batches(store, rx, socket_id));
        Self {
            batches,
            writer,
            socket_id,
            dropped: AtomicU64::new(0),
        }
    }

    /// Queues `records` for appending under `namespace` and returns at once.
    ///
    /// If the queue is full the batch is dropped, logged and counted.
    pub fn forward(&self, namespace: &str, records: Vec<AvlRecord>) {
        if records.is_empty() {
            return;
        }
        let batch = Batch {
            namespace: namespace.to_string(),
            records,
        };
        let (batch, reason) = match self.batches.try_send(batch) {
            Ok(()) => return,
            Err(TrySendError::Full(batch)) => (batch, "storage queue full"),
            Err(TrySendError::Closed(batch)) => (batch, "storage writer has stopped"),
        };
        let count = batch.records.len();
        self.dropped.fetch_add(count as u64, Ordering::Relaxed);
        error!(
            socket_id = %self.socket_id,
            namespace,
            count,
            "{reason}; records dropped"
        );
    }

    /// Records dropped so far without reaching the writer.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Closes the queue and waits until every queued record was attempted.
    pub async fn finish(self) -> ForwardStats {
        let dropped = self.dropped();
        drop(self.batches);
        let mut stats = match self.writer.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(socket_id = %self.socket_id, "storage writer task failed: {e}");
                ForwardStats::default()
            }
        };
        stats.failed += dropped;
        stats
    }
}

async fn write_batches(
    store: Arc<dyn RecordStore>,
    mut rx: mpsc::Receiver<Batch>,
    socket_id: Uuid,
) -> ForwardStats {
    let mut stats = ForwardStats::default();
    while let Some(batch) = rx.recv().await {
        for record in &batch.records {
            match store.append(&batch.namespace, record).await {
                Ok(()) => stats.stored += 1,
                Err(e) => {
                    stats.failed += 1;
                    error!(
                        %socket_id,
                        namespace = %batch.namespace,
                        timestamp = %record.timestamp,
                        "storage append failed: {e}"
                    );
                }
            }
        }
        debug!(%socket_id, namespace = %batch.namespace, count = batch.records.len(), "batch appended");
    }
    stats
}

// ── Tests ─────────────────────────────────────────────────────────────────────
