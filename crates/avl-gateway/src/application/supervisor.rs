//! Connection supervisor: one per accepted socket.
//!
//! The supervisor owns the [`SessionState`] of its connection and runs a
//! strict read → dispatch → ACK loop:
//!
//! ```text
//! loop {
//!     frame = reader.next_frame()        // waits for the device
//!     match parse(frame) {               // shape only, never the phase
//!         Identity   → identify, ACK 01
//!         Telemetry  → decode, forward records, ACK count   (or drop: no ACK)
//!         Unrecognized → drop: no ACK
//!     }
//! }
//! ```
//!
//! The ACK for frame N is fully written before frame N+1 is read, which
//! keeps the device's stop-and-wait window in step.  Storage appends are
//! handed to a [`RecordForwarder`] and never delay an ACK.
//!
//! The supervisor is generic over any `AsyncRead + AsyncWrite` stream so
//! tests can drive it with scripted mock sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use avl_core::protocol::codec::decode_telemetry;
use avl_core::protocol::frame::{parse, IdentityFrame, InboundFrame};
use avl_core::{Ack, DecodeOptions, IdentifyOutcome, NamespaceStrategy, SessionPhase, SessionState};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::forward_records::{
    ForwardStats, RecordForwarder, RecordStore, DEFAULT_QUEUE_CAPACITY,
};
use crate::infrastructure::network::frame_reader::FrameReader;

/// Default bound on how far an enveloped frame may be reassembled.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// Error type that ends a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No bytes arrived within the configured idle timeout.
    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),
}

/// Per-session behaviour, shared by every connection of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Close the connection after this long without any bytes. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Upper bound for reassembling a standard-envelope frame.
    pub max_frame_len: usize,
    pub decode: DecodeOptions,
    pub namespace: NamespaceStrategy,
    /// Record batches that may wait for storage before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(300)),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            decode: DecodeOptions::default(),
            namespace: NamespaceStrategy::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// What happened during a session that ended normally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Frames that received an ACK (identity and telemetry).
    pub frames_acked: u64,
    /// Frames dropped without an ACK.
    pub frames_dropped: u64,
    /// Records acknowledged to the device.
    pub records_accepted: u64,
    /// Storage outcome for the forwarded records.
    pub storage: ForwardStats,
}

/// Drives one device connection from accept to close.
pub struct ConnectionSupervisor {
    session: SessionState,
    settings: SessionSettings,
    store: Arc<dyn RecordStore>,
}

impl ConnectionSupervisor {
    /// Creates a supervisor for a connection from `remote_address`.
    ///
    /// `store` receives every decoded record of the session.
    pub fn new(
        remote_address: SocketAddr,
        settings: SessionSettings,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            session: SessionState::new(remote_address),
            settings,
            store,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Runs the session until the peer closes the stream or an I/O error or
    /// idle timeout occurs.
    ///
    /// Queued storage appends are drained before this returns, whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] on a socket failure and
    /// [`SessionError::IdleTimeout`] when the device goes silent.
    pub async fn run<S>(mut self, stream: S) -> Result<SessionSummary, SessionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(
            read_half,
            self.settings.idle_timeout,
            self.settings.max_frame_len,
        );
        let forwarder = RecordForwarder::spawn(
            Arc::clone(&self.store),
            self.session.socket_id(),
            self.settings.queue_capacity,
        );

        let mut summary = SessionSummary::default();
        let outcome = self
            .read_loop(&mut reader, &mut write_half, &forwarder, &mut summary)
            .await;

        summary.storage = forwarder.finish().await;
        outcome.map(|()| summary)
    }

    async fn read_loop<R, W>(
        &mut self,
        reader: &mut FrameReader<R>,
        writer: &mut WriteHalf<W>,
        forwarder: &RecordForwarder,
        summary: &mut SessionSummary,
    ) -> Result<(), SessionError>
    where
        R: AsyncRead + Unpin,
        W: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(frame) = reader.next_frame().await? {
            match self.handle_frame(&frame, forwarder) {
                Some(ack) => {
                    writer.write_all(&ack.encode()).await?;
                    writer.flush().await?;
                    debug!(
                        socket_id = %self.socket_id(),
                        ?ack,
                        "ACK written"
                    );
                    summary.frames_acked += 1;
                    if let Ack::Telemetry { accepted } = ack {
                        summary.records_accepted += u64::from(accepted);
                    }
                }
                None => summary.frames_dropped += 1,
            }
        }
        Ok(())
    }

    /// Dispatches one frame by shape and returns the ACK it earned, if any.
    fn handle_frame(&mut self, frame: &[u8], forwarder: &RecordForwarder) -> Option<Ack> {
        match parse(frame) {
            InboundFrame::Identity(identity) => {
                self.on_identity(identity);
                Some(Ack::Identity)
            }
            InboundFrame::Telemetry(bytes) => self.on_telemetry(bytes, forwarder),
            InboundFrame::Unrecognized { len } => {
                warn!(
                    socket_id = %self.socket_id(),
                    peer = %self.session.remote_address(),
                    len,
                    "dropping unrecognized frame; no ACK"
                );
                None
            }
        }
    }

    fn on_identity(&mut self, frame: IdentityFrame) {
        let socket_id = self.socket_id();
        let peer = self.session.remote_address();
        if !frame.declared_len_matches() {
            debug!(%socket_id, declared_len = frame.declared_len, "identity length prefix is not 15");
        }
        let imei = frame.identity.imei.clone();
        match self.session.identify(frame.identity) {
            IdentifyOutcome::Activated => info!(%socket_id, %peer, %imei, "device identified"),
            IdentifyOutcome::Repeated => debug!(%socket_id, %imei, "identity repeated"),
            IdentifyOutcome::Conflicting { kept } => warn!(
                %socket_id,
                %peer,
                announced = %imei,
                kept = %kept,
                "device announced a different IMEI; keeping the first"
            ),
        }
    }

    fn on_telemetry(&mut self, bytes: &[u8], forwarder: &RecordForwarder) -> Option<Ack> {
        let socket_id = self.socket_id();
        let peer = self.session.remote_address();

        let frame = match decode_telemetry(bytes, &self.settings.decode) {
            Ok(frame) => frame,
            Err(e) if e.is_framing() => {
                info!(
                    %socket_id,
                    %peer,
                    len = bytes.len(),
                    "dropping malformed frame; no ACK: {e}"
                );
                return None;
            }
            Err(e) => {
                warn!(%socket_id, %peer, len = bytes.len(), "dropping telemetry frame; no ACK: {e}");
                return None;
            }
        };

        if self.session.phase() == SessionPhase::AwaitingIdentity {
            warn!(%socket_id, %peer, "telemetry before identity; processing anyway");
        }

        let accepted = frame.accepted_count();
        info!(
            %socket_id,
            %peer,
            records = accepted,
            envelope = ?frame.envelope,
            "telemetry frame decoded"
        );

        let namespace = self.session.namespace_key(self.settings.namespace);
        forwarder.forward(&namespace, frame.records);
        Some(Ack::Telemetry { accepted })
    }

    fn socket_id(&self) -> Uuid {
        self.session.socket_id()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::forward_records::MockRecordStore;
    use avl_core::protocol::frame::encode_identity;

    fn make_supervisor(store: MockRecordStore) -> ConnectionSupervisor {
        ConnectionSupervisor::new(
            "192.168.1.5:40000".parse().unwrap(),
            SessionSettings::default(),
            Arc::new(store),
        )
    }

    #[tokio::test]
    async fn test_identity_frame_earns_identity_ack_and_activates() {
        // Arrange
        let mut store = MockRecordStore::new();
        store.expect_append().never();
        let mut supervisor = make_supervisor(store);
        let forwarder = RecordForwarder::spawn(
            Arc::clone(&supervisor.store),
            Uuid::new_v4(),
            DEFAULT_QUEUE_CAPACITY,
        );

        // Act
        let ack = supervisor.handle_frame(&encode_identity("123456789012345"), &forwarder);

        // Assert
        assert_eq!(ack, Some(Ack::Identity));
        assert_eq!(supervisor.session().phase(), SessionPhase::Active);
        assert_eq!(
            supervisor.session().identity().map(|i| i.imei.as_str()),
            Some("123456789012345")
        );
        forwarder.finish().await;
    }

    #[tokio::test]
    async fn test_second_identity_is_acked_but_first_is_kept() {
        let store = MockRecordStore::new();
        let mut supervisor = make_supervisor(store);
        let forwarder = RecordForwarder::spawn(
            Arc::clone(&supervisor.store),
            Uuid::new_v4(),
            DEFAULT_QUEUE_CAPACITY,
        );

        supervisor.handle_frame(&encode_identity("111111111111111"), &forwarder);
        let ack = supervisor.handle_frame(&encode_identity("222222222222222"), &forwarder);

        assert_eq!(ack, Some(Ack::Identity));
        assert_eq!(
            supervisor.session().identity().map(|i| i.imei.as_str()),
            Some("111111111111111")
        );
        forwarder.finish().await;
    }

    #[tokio::test]
    async fn test_short_frame_earns_no_ack() {
        let mut store = MockRecordStore::new();
        store.expect_append().never();
        let mut supervisor = make_supervisor(store);
        let forwarder = RecordForwarder::spawn(
            Arc::clone(&supervisor.store),
            Uuid::new_v4(),
            DEFAULT_QUEUE_CAPACITY,
        );

        assert_eq!(supervisor.handle_frame(&[0x00, 0x01, 0x02], &forwarder), None);
        assert_eq!(supervisor.handle_frame(&[0xAB; 20], &forwarder), None);
        assert_eq!(supervisor.session().phase(), SessionPhase::AwaitingIdentity);
        forwarder.finish().await;
    }

    #[test]
    fn test_session_settings_default_values() {
        let settings = SessionSettings::default();
        assert_eq!(settings.idle_timeout, Some(Duration::from_secs(300)));
        assert_eq!(settings.max_frame_len, 4096);
        assert!(!settings.decode.require_envelope);
        assert_eq!(settings.namespace, NamespaceStrategy::RemoteAddress);
        assert_eq!(settings.queue_capacity, 1024);
    }

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            SessionError::IdleTimeout(Duration::from_secs(5)).to_string(),
            "no data received for 5s"
        );
    }
}
