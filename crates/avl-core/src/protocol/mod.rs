//! Protocol module: frame classification, the AVL decoder, and ACK encoding.

pub mod ack;
pub mod codec;
pub mod crc;
pub mod frame;

pub use ack::Ack;
pub use codec::{
    decode_telemetry, encode_telemetry, resolve_timestamp, DecodeOptions, EncodeError, Envelope,
    ProtocolError, TelemetryFrame, TimestampInterpretation,
};
pub use frame::{parse, IdentityFrame, InboundFrame};
