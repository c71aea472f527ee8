//! # avl-core
//!
//! Shared library for the AVL gateway containing the Codec 8 frame decoder,
//! the acknowledgment encoder, and the per-connection session domain types.
//!
//! This crate has zero dependencies on sockets, file systems, or async
//! runtimes.  Everything here operates on byte slices and plain values, so it
//! can be unit-tested exhaustively without a network.
//!
//! # Architecture overview
//!
//! GPS trackers of the Teltonika family open a TCP connection to the gateway
//! and speak a simple stop-and-wait protocol:
//!
//! ```text
//! Device                                  Gateway
//! ──────                                  ───────
//! [00 0F] + 15-byte ASCII IMEI   ──▶
//!                                 ◀──     01
//! AVL telemetry frame (Codec 8)  ──▶
//!                                 ◀──     00 00 00 NN   (records accepted)
//! AVL telemetry frame (Codec 8)  ──▶
//!                                 ◀──     ...
//! ```
//!
//! - **`protocol`** – How bytes travel over the wire.  Classifies inbound
//!   chunks, decodes AVL frames into typed records, and encodes the ACKs.
//!
//! - **`domain`** – Position records, device identity, and the state a
//!   single connection carries from open to close.

pub mod domain;
pub mod protocol;

pub use domain::record::{AvlRecord, DeviceIdentity, IoElement};
pub use domain::session::{
    sanitize_key, IdentifyOutcome, NamespaceStrategy, SessionPhase, SessionState,
};
pub use protocol::ack::Ack;
pub use protocol::codec::{
    decode_telemetry, DecodeOptions, Envelope, ProtocolError, TelemetryFrame,
};
pub use protocol::frame::{parse, IdentityFrame, InboundFrame};
