//! Infrastructure layer for the gateway.
//!
//! Contains OS-facing adapters: the TCP listener, the socket frame reader,
//! configuration file handling, and the record stores.

pub mod network;
pub mod storage;
