//! Per-connection session state.
//!
//! A session is created when a socket is accepted and dropped when it closes.
//! It is owned by exactly one connection supervisor and never shared.
//!
//! # State machine
//!
//! ```text
//!   AwaitingIdentity ──(first identity frame)──▶ Active
//! ```
//!
//! The transition happens once.  Later identity frames are acknowledged again
//! but never move the session backwards or replace the first identity.
//!
//! Frame *classification* does not consult the phase: a telemetry frame that
//! arrives before identification is still decoded and acknowledged.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::record::DeviceIdentity;

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No identity frame has been decoded yet.
    AwaitingIdentity,
    /// An identity frame has been decoded and acknowledged.
    Active,
}

/// Result of feeding an identity frame into a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyOutcome {
    /// First identity of the connection; the session is now active.
    Activated,
    /// Same IMEI announced again.
    Repeated,
    /// A different IMEI was announced; the original identity is kept.
    Conflicting { kept: DeviceIdentity },
}

/// How the storage namespace for a connection's records is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceStrategy {
    /// Sanitised remote IP address.
    #[default]
    RemoteAddress,
    /// Device IMEI once identified, remote address before that.
    Imei,
}

/// State owned by one connection supervisor.
#[derive(Debug, Clone)]
pub struct SessionState {
    socket_id: Uuid,
    remote_address: SocketAddr,
    identity: Option<DeviceIdentity>,
    phase: SessionPhase,
}

impl SessionState {
    /// Creates a fresh session in [`SessionPhase::AwaitingIdentity`].
    pub fn new(remote_address: SocketAddr) -> Self {
        Self {
            socket_id: Uuid::new_v4(),
            remote_address,
            identity: None,
            phase: SessionPhase::AwaitingIdentity,
        }
    }

    pub fn socket_id(&self) -> Uuid {
        self.socket_id
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Records an identity announced by the device.
    pub fn identify(&mut self, identity: DeviceIdentity) -> IdentifyOutcome {
        match &self.identity {
            None => {
                self.identity = Some(identity);
                self.phase = SessionPhase::Active;
                IdentifyOutcome::Activated
            }
            Some(current) if *current == identity => IdentifyOutcome::Repeated,
            Some(current) => IdentifyOutcome::Conflicting {
                kept: current.clone(),
            },
        }
    }

    /// Storage namespace key for records received on this connection.
    ///
    /// Deterministic for a given strategy, address and identity.
    pub fn namespace_key(&self, strategy: NamespaceStrategy) -> String {
        match (strategy, &self.identity) {
            (NamespaceStrategy::Imei, Some(identity)) => sanitize_key(&identity.imei),
            _ => sanitize_key(&self.remote_address.ip().to_string()),
        }
    }
}

/// Turns an arbitrary identifier into a storage-safe key.
///
/// Every character that is not ASCII alphanumeric becomes `_`, then leading
/// underscores are stripped: `"::ffff:10.0.0.7"` becomes `"ffff_10_0_0_7"`.
pub fn sanitize_key(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    replaced.trim_start_matches('_').to_string()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_new_session_awaits_identity() {
        let session = SessionState::new(addr("10.0.0.1:40000"));
        assert_eq!(session.phase(), SessionPhase::AwaitingIdentity);
        assert!(session.identity().is_none());
    }

    #[test]
    fn test_new_sessions_get_distinct_socket_ids() {
        let a = SessionState::new(addr("10.0.0.1:40000"));
        let b = SessionState::new(addr("10.0.0.1:40000"));
        assert_ne!(a.socket_id(), b.socket_id());
    }

    #[test]
    fn test_first_identity_activates_session() {
        // Arrange
        let mut session = SessionState::new(addr("10.0.0.1:40000"));

        // Act
        let outcome = session.identify(DeviceIdentity::new("123456789012345"));

        // Assert
        assert_eq!(outcome, IdentifyOutcome::Activated);
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(session.identity().unwrap().imei, "123456789012345");
    }

    #[test]
    fn test_repeated_identity_keeps_session_active() {
        let mut session = SessionState::new(addr("10.0.0.1:40000"));
        session.identify(DeviceIdentity::new("123456789012345"));

        let outcome = session.identify(DeviceIdentity::new("123456789012345"));

        assert_eq!(outcome, IdentifyOutcome::Repeated);
        assert_eq!(session.phase(), SessionPhase::Active);
    }

    #[test]
    fn test_conflicting_identity_keeps_first_imei() {
        let mut session = SessionState::new(addr("10.0.0.1:40000"));
        session.identify(DeviceIdentity::new("111111111111111"));

        let outcome = session.identify(DeviceIdentity::new("222222222222222"));

        assert_eq!(
            outcome,
            IdentifyOutcome::Conflicting {
                kept: DeviceIdentity::new("111111111111111")
            }
        );
        assert_eq!(session.identity().unwrap().imei, "111111111111111");
    }

    #[test]
    fn test_sanitize_key_replaces_ipv4_dots() {
        assert_eq!(sanitize_key("192.168.1.5"), "192_168_1_5");
    }

    #[test]
    fn test_sanitize_key_strips_leading_separators() {
        assert_eq!(sanitize_key("::ffff:10.0.0.7"), "ffff_10_0_0_7");
        assert_eq!(sanitize_key("::1"), "1");
    }

    #[test]
    fn test_sanitize_key_keeps_alphanumerics() {
        assert_eq!(sanitize_key("fe80::1a2b"), "fe80__1a2b");
        assert_eq!(sanitize_key("123456789012345"), "123456789012345");
    }

    #[test]
    fn test_namespace_key_uses_remote_ip_without_port() {
        let session = SessionState::new(addr("192.168.1.5:51234"));
        assert_eq!(
            session.namespace_key(NamespaceStrategy::RemoteAddress),
            "192_168_1_5"
        );
    }

    #[test]
    fn test_namespace_key_imei_falls_back_to_address_before_identity() {
        let mut session = SessionState::new(addr("[::1]:5055"));
        assert_eq!(session.namespace_key(NamespaceStrategy::Imei), "1");

        session.identify(DeviceIdentity::new("356307042441013"));
        assert_eq!(
            session.namespace_key(NamespaceStrategy::Imei),
            "356307042441013"
        );
        // The address strategy ignores the identity entirely.
        assert_eq!(session.namespace_key(NamespaceStrategy::RemoteAddress), "1");
    }

    #[test]
    fn test_namespace_strategy_deserializes_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            namespace: NamespaceStrategy,
        }
        let w: Wrapper = serde_json::from_str(r#"{"namespace":"remote_address"}"#).unwrap();
        assert_eq!(w.namespace, NamespaceStrategy::RemoteAddress);
        let w: Wrapper = serde_json::from_str(r#"{"namespace":"imei"}"#).unwrap();
        assert_eq!(w.namespace, NamespaceStrategy::Imei);
    }
}
