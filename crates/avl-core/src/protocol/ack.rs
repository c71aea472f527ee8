//! Acknowledgments sent back to the device.
//!
//! The device keeps every frame in its internal buffer until it sees the
//! matching ACK, and will not send the next frame before that.  There is no
//! NACK: withholding the ACK is the only way to ask for a retransmission.
//!
//! ```text
//! identity accepted   : 01
//! telemetry accepted  : [count:4]   big-endian number of records accepted
//! ```

/// Byte sent after a decoded identity frame.
pub const IDENTITY_ACCEPTED: u8 = 0x01;

/// A reply owed to the device for one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Identity frame accepted.
    Identity,
    /// Telemetry frame processed; `accepted` records were taken.
    Telemetry { accepted: u32 },
}

impl Ack {
    /// Wire bytes for this acknowledgment.
    pub fn encode(self) -> Vec<u8> {
        match self {
            Ack::Identity => vec![IDENTITY_ACCEPTED],
            Ack::Telemetry { accepted } => accepted.to_be_bytes().to_vec(),
        }
    }
}
