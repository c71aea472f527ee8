//! avl-gateway library crate.
//!
//! The TCP side of the AVL gateway: accepts tracker connections, runs one
//! connection supervisor per socket, acknowledges frames, and forwards the
//! decoded records to a storage backend.
//!
//! # Architecture
//!
//! ```text
//! Tracker (Codec 8 over TCP)
//!         ↕
//! [avl-gateway]
//!   ├── application/
//!   │     ├── supervisor        per-connection state machine + ACK ordering
//!   │     └── forward_records   RecordStore seam, background writer
//!   └── infrastructure/
//!         ├── network/          accept loop, frame reader
//!         └── storage/          TOML config, memory and JSON-lines stores
//! ```
//!
//! Frame classification and decoding live in `avl-core`; nothing in this
//! crate touches raw record bytes.

pub mod application;
pub mod infrastructure;
