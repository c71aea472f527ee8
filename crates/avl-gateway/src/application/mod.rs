//! Application layer use cases for the gateway.
//!
//! - **`supervisor`** – Owns one connection from accept to close: reads
//!   frames, dispatches them by shape, writes ACKs in arrival order, and hands
//!   decoded records to the forwarder.
//!
//! - **`forward_records`** – The storage collaborator seam (`RecordStore`)
//!   and the per-session background writer that appends records without
//!   holding up the socket.

pub mod forward_records;
pub mod supervisor;
