//! Storage infrastructure: configuration file persistence and record stores.
//!
//! - `config` reads and writes the gateway's TOML configuration.
//! - `memory` keeps records in a map; used by tests and short-lived runs.
//! - `jsonl` appends records to one JSON-lines file per namespace.

pub mod config;
pub mod jsonl;
pub mod memory;

use std::sync::Arc;

use tracing::{info, warn};

use crate::application::forward_records::RecordStore;
use config::{StorageBackend, StorageConfig};

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// Builds the record store selected by `config`.
pub fn open_store(config: &StorageConfig) -> Arc<dyn RecordStore> {
    match config.backend {
        StorageBackend::Jsonl => {
            let store = JsonlStore::new(config.directory.clone());
            info!(directory = %store.directory().display(), "JSON-lines storage selected");
            Arc::new(store)
        }
        StorageBackend::Memory => {
            warn!("memory storage backend selected; records are lost on exit");
            Arc::new(MemoryStore::new())
        }
    }
}
