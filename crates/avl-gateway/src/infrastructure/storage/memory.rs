//! In-memory record store.

use std::collections::HashMap;

use async_trait::async_trait;
use avl_core::AvlRecord;
use tokio::sync::RwLock;

use crate::application::forward_records::{RecordStore, StorageError};

/// Keeps every appended record in a map keyed by namespace.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Vec<AvlRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records stored under `namespace`, in append order.
    pub async fn records(&self, namespace: &str) -> Vec<AvlRecord> {
        self.records
            .read()
            .await
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Namespaces that hold at least one record, sorted.
    pub async fn namespaces(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.records.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Total number of records across all namespaces.
    pub async fn len(&self) -> usize {
        self.records.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn append(&self, namespace: &str, record: &AvlRecord) -> Result<(), StorageError> {
        self.records
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .push(record.clone());
        Ok(())
    }
}
