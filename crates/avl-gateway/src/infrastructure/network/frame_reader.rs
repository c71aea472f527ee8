//! Frame reader: turns a socket byte stream into logical frames.
//!
//! The device protocol has no transport framing of its own, so the reader
//! mostly trusts the socket: whatever one `read` returns is one frame.  The
//! exception is a standard-envelope telemetry frame, whose first 8 bytes
//! announce its total length:
//!
//! ```text
//! [00 00 00 00][len:4] ...   →  frame is 12 + len bytes long
//! ```
//!
//! When such a prefix is buffered the reader keeps reading until the whole
//! frame has arrived (up to `max_frame_len`), and splits off any bytes past
//! its end as the start of the next frame.  A read shorter than 8 bytes that
//! could still be the start of that prefix is held back as well.  Identity
//! frames, compact envelopes and bare frames are passed through as read.
//!
//! Every read is bounded by the idle timeout.

use std::time::Duration;

use avl_core::protocol::codec::standard_frame_len;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::application::supervisor::SessionError;

/// Smallest read buffer, regardless of `max_frame_len`.
const MIN_READ_BUFFER: usize = 64;

/// Zero preamble plus length field.
const ENVELOPE_PREFIX_LEN: usize = 8;

/// Reads logical frames from an async byte stream.
pub struct FrameReader<R> {
    reader: R,
    idle_timeout: Option<Duration>,
    max_frame_len: usize,
    chunk: Vec<u8>,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, idle_timeout: Option<Duration>, max_frame_len: usize) -> Self {
        Self {
            reader,
            idle_timeout,
            max_frame_len,
            chunk: vec![0u8; max_frame_len.max(MIN_READ_BUFFER)],
            pending: Vec::new(),
        }
    }

    /// Returns the next frame, or `None` once the peer has closed the stream.
    ///
    /// Bytes of an incomplete frame still buffered at close are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::IdleTimeout`] if a read waits longer than the
    /// idle timeout, and [`SessionError::Io`] on socket failure.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(Some(frame));
            }

            let n = self.read_chunk().await?;
            if n == 0 {
                if !self.pending.is_empty() {
                    warn!(
                        discarded = self.pending.len(),
                        "peer closed mid-frame; incomplete frame dropped without ACK"
                    );
                    self.pending.clear();
                }
                return Ok(None);
            }
            self.pending.extend_from_slice(&self.chunk[..n]);
        }
    }

    /// Splits one frame off the front of the buffered bytes.  Returns `None`
    /// when the buffer is empty or a standard-envelope frame is incomplete.
    fn take_frame(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            return None;
        }
        if is_partial_prefix(&self.pending) {
            debug!(
                buffered = self.pending.len(),
                "short chunk could open an envelope; holding it for more bytes"
            );
            return None;
        }
        match standard_frame_len(&self.pending) {
            Some(expected) if expected > self.max_frame_len => {
                warn!(
                    declared = expected,
                    limit = self.max_frame_len,
                    "enveloped frame exceeds max_frame_len; passing through as read"
                );
                Some(std::mem::take(&mut self.pending))
            }
            Some(expected) if expected > self.pending.len() => None,
            Some(expected) => {
                let rest = self.pending.split_off(expected);
                Some(std::mem::replace(&mut self.pending, rest))
            }
            None => Some(std::mem::take(&mut self.pending)),
        }
    }

    async fn read_chunk(&mut self) -> Result<usize, SessionError> {
        let read = self.reader.read(&mut self.chunk);
        match self.idle_timeout {
            Some(limit) => match timeout(limit, read).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(SessionError::IdleTimeout(limit)),
            },
            None => Ok(read.await?),
        }
    }
}

/// Whether `buf` is too short to tell but could still open a standard envelope.
fn is_partial_prefix(buf: &[u8]) -> bool {
    buf.len() < ENVELOPE_PREFIX_LEN && buf.iter().take(4).all(|&b| b == 0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use avl_core::protocol::frame::encode_identity;
    use tokio_test::io::Builder;

    /// A standard-envelope frame with a data field of `data_len` bytes.
    /// Only the prefix matters to the reader.
    fn standard_frame(data_len: u32) -> Vec<u8> {
        let mut buf = vec![0, 0, 0, 0];
        buf.extend_from_slice(&data_len.to_be_bytes());
        buf.extend(std::iter::repeat(0xAA).take(data_len as usize + 4));
        buf
    }

    #[tokio::test]
    async fn test_each_read_is_one_frame() {
        // Arrange
        let identity = encode_identity("123456789012345");
        let bare = [0x11u8; 30];
        let mock = Builder::new().read(&identity).read(&bare).build();
        let mut reader = FrameReader::new(mock, None, 4096);

        // Act / Assert
        assert_eq!(reader.next_frame().await.unwrap(), Some(identity));
        assert_eq!(reader.next_frame().await.unwrap(), Some(bare.to_vec()));
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fragmented_standard_frame_is_reassembled() {
        // Arrange
        let frame = standard_frame(50);
        let mock = Builder::new()
            .read(&frame[..6])
            .read(&frame[6..40])
            .read(&frame[40..])
            .build();
        let mut reader = FrameReader::new(mock, None, 4096);

        // Act
        let got = reader.next_frame().await.unwrap();

        // Assert
        assert_eq!(got, Some(frame));
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_coalesced_standard_frames_are_split() {
        let first = standard_frame(20);
        let second = standard_frame(30);
        let mut both = first.clone();
        both.extend_from_slice(&second);
        let mock = Builder::new().read(&both).build();
        let mut reader = FrameReader::new(mock, None, 4096);

        assert_eq!(reader.next_frame().await.unwrap(), Some(first));
        assert_eq!(reader.next_frame().await.unwrap(), Some(second));
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_envelope_is_passed_through_as_read() {
        let frame = standard_frame(200);
        let mock = Builder::new().read(&frame[..64]).build();
        let mut reader = FrameReader::new(mock, None, 128);

        assert_eq!(reader.next_frame().await.unwrap(), Some(frame[..64].to_vec()));
    }

    #[tokio::test]
    async fn test_short_read_of_zeros_waits_for_length_field() {
        let frame = standard_frame(16);
        let mock = Builder::new().read(&frame[..3]).read(&frame[3..]).build();
        let mut reader = FrameReader::new(mock, None, 4096);

        assert_eq!(reader.next_frame().await.unwrap(), Some(frame));
    }

    #[test]
    fn test_is_partial_prefix() {
        assert!(is_partial_prefix(&[0x00, 0x00]));
        assert!(is_partial_prefix(&[0x00, 0x00, 0x00, 0x00, 0x00]));
        assert!(!is_partial_prefix(&[0x00, 0x0F, 0x33]));
        assert!(!is_partial_prefix(&[0x00; 8]));
    }

    #[tokio::test]
    async fn test_short_zero_chunk_is_held_then_dropped_at_close() {
        // Arrange: three zero bytes and nothing else.
        let mock = Builder::new().read(&[0x00, 0x00, 0x00]).build();
        let mut reader = FrameReader::new(mock, None, 4096);

        // Act / Assert: never surfaced as a frame.
        assert_eq!(reader.next_frame().await.unwrap(), None);
        assert!(reader.pending.is_empty());
    }

    #[tokio::test]
    async fn test_close_mid_frame_discards_partial_bytes() {
        let frame = standard_frame(50);
        let mock = Builder::new().read(&frame[..30]).build();
        let mut reader = FrameReader::new(mock, None, 4096);

        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_hits_idle_timeout() {
        // Arrange: the peer sends nothing for an hour.
        let mock = Builder::new().wait(Duration::from_secs(3600)).build();
        let mut reader = FrameReader::new(mock, Some(Duration::from_secs(30)), 4096);

        // Act
        let result = reader.next_frame().await;

        // Assert
        assert!(matches!(
            result,
            Err(SessionError::IdleTimeout(limit)) if limit == Duration::from_secs(30)
        ));
    }

    #[tokio::test]
    async fn test_read_error_is_reported_as_io() {
        let mock = Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut reader = FrameReader::new(mock, None, 4096);

        assert!(matches!(reader.next_frame().await, Err(SessionError::Io(_))));
    }
}
