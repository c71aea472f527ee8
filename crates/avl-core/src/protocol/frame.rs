//! Classification of inbound chunks into identity or telemetry frames.
//!
//! The device protocol has no message-type byte.  At connection start the
//! device sends its IMEI as a 17-byte frame; everything afterwards is AVL
//! telemetry.  The only discriminator on the wire is therefore the length of
//! the chunk:
//!
//! ```text
//! identity  : [imei_len:2 = 0x000F][imei:15 ASCII]     exactly 17 bytes
//! telemetry : anything else (see `codec`)
//! ```
//!
//! Classification is by shape only and never consults the connection phase.
//! A 17-byte telemetry chunk would be misread as an identity; no Codec 8
//! frame that carries at least one record is that short, but fragmented reads
//! could still produce one.

use tracing::debug;

use crate::domain::record::DeviceIdentity;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Total size of an identity frame.
pub const IDENTITY_FRAME_LEN: usize = 17;

/// Length of the IMEI payload inside an identity frame.
pub const IMEI_LEN: usize = 15;

/// Smallest chunk that can hold any telemetry framing: a compact envelope
/// with zero records (length 4 + codec + count + trailer + CRC 4).
pub const MIN_TELEMETRY_LEN: usize = 11;

// ── Frame types ───────────────────────────────────────────────────────────────

/// A decoded identity frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityFrame {
    /// Length prefix as sent by the device.  Expected to be 15.
    pub declared_len: u16,
    pub identity: DeviceIdentity,
}

impl IdentityFrame {
    /// Whether the length prefix agrees with the IMEI payload size.
    pub fn declared_len_matches(&self) -> bool {
        self.declared_len as usize == IMEI_LEN
    }
}

/// Result of classifying one inbound chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame<'a> {
    Identity(IdentityFrame),
    /// A telemetry candidate, still undecoded.
    Telemetry(&'a [u8]),
    /// Too short to be either kind of frame.
    Unrecognized { len: usize },
}

/// Classifies a chunk by its length.
pub fn parse(buf: &[u8]) -> InboundFrame<'_> {
    if buf.len() == IDENTITY_FRAME_LEN {
        return InboundFrame::Identity(identity_from_bytes(buf));
    }
    if buf.len() < MIN_TELEMETRY_LEN {
        debug!(len = buf.len(), "chunk too short for any frame kind");
        return InboundFrame::Unrecognized { len: buf.len() };
    }
    InboundFrame::Telemetry(buf)
}

/// The IMEI is the text of bytes `[2, 17)`.  Bytes that are not valid UTF-8
/// are replaced, never rejected.  Caller guarantees `buf.len() == IDENTITY_FRAME_LEN`.
fn identity_from_bytes(buf: &[u8]) -> IdentityFrame {
    let declared_len = u16::from_be_bytes([buf[0], buf[1]]);
    let imei = String::from_utf8_lossy(&buf[2..IDENTITY_FRAME_LEN]).into_owned();
    IdentityFrame {
        declared_len,
        identity: DeviceIdentity::new(imei),
    }
}

/// Builds the identity frame a device would send for `imei`.
///
/// Used by tests and tooling that simulate a device.
pub fn encode_identity(imei: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + imei.len());
    buf.extend_from_slice(&(imei.len() as u16).to_be_bytes());
    buf.extend_from_slice(imei.as_bytes());
    buf
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_identity(buf: &[u8]) -> IdentityFrame {
        match parse(buf) {
            InboundFrame::Identity(id) => id,
            other => panic!("expected identity, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_17_bytes_is_identity() {
        // Arrange
        let buf = encode_identity("123456789012345");

        // Act
        let frame = parse(&buf);

        // Assert
        match frame {
            InboundFrame::Identity(id) => {
                assert_eq!(id.identity.imei, "123456789012345");
                assert_eq!(id.declared_len, 15);
                assert!(id.declared_len_matches());
            }
            other => panic!("expected identity, got {other:?}"),
        }
    }

    #[test]
    fn test_identity_imei_is_bytes_2_to_17() {
        let mut buf = vec![0x00, 0x0F];
        buf.extend_from_slice(b"356307042441013");
        let id = expect_identity(&buf);
        assert_eq!(id.identity.imei, "356307042441013");
    }

    #[test]
    fn test_identity_accepts_non_digit_payload() {
        // Content is not validated; the device must always get its ACK.
        let mut buf = vec![0x00, 0x0F];
        buf.extend_from_slice(b"ABC-DEF_GHI.JKL");
        let id = expect_identity(&buf);
        assert_eq!(id.identity.imei, "ABC-DEF_GHI.JKL");
    }

    #[test]
    fn test_identity_with_wrong_length_prefix_still_decodes() {
        let mut buf = vec![0x00, 0x10];
        buf.extend_from_slice(b"123456789012345");
        let id = expect_identity(&buf);
        assert!(!id.declared_len_matches());
        assert_eq!(id.identity.imei, "123456789012345");
    }

    #[test]
    fn test_non_utf8_imei_bytes_are_replaced() {
        let mut buf = vec![0x00, 0x0F];
        buf.extend_from_slice(b"12345678901234");
        buf.push(0xFF);
        let id = expect_identity(&buf);
        assert_eq!(id.identity.imei, "12345678901234\u{FFFD}");
    }

    #[test]
    fn test_parse_short_chunk_is_unrecognized() {
        assert_eq!(parse(&[0x00; 5]), InboundFrame::Unrecognized { len: 5 });
        assert_eq!(parse(&[]), InboundFrame::Unrecognized { len: 0 });
    }

    #[test]
    fn test_parse_other_lengths_are_telemetry_candidates() {
        let buf = [0u8; 30];
        assert_eq!(parse(&buf), InboundFrame::Telemetry(&buf));
        let buf = [0u8; 16];
        assert_eq!(parse(&buf), InboundFrame::Telemetry(&buf));
        let buf = [0u8; 18];
        assert_eq!(parse(&buf), InboundFrame::Telemetry(&buf));
    }
}
