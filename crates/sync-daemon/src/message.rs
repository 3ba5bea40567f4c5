//! Wire-level handshake envelope, sent immediately after a WebSocket
//! connection is established.
//!
//! This mirrors [`sync_core::protocol::handshake::Handshake`] but keeps
//! `peer_id` and `role` as plain strings: at this point in the connection
//! lifecycle the remote hasn't been validated as a well-formed [`PeerId`]
//! yet, and a malformed handshake should fail JSON parsing rather than
//! panic deep inside `PeerId::from_str`.
//!
//! [`PeerId`]: sync_core::PeerId

use serde::{Deserialize, Serialize};

pub use sync_core::protocol::MAX_MESSAGE_SIZE;
use sync_core::protocol::PROTOCOL_VERSION;

/// Versioned handshake, JSON-encoded on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub version: u32,
    pub peer_id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl HandshakeMessage {
    /// Create a handshake with no advertised address (client-only).
    pub fn new(peer_id: &str, role: &str) -> Self {
        Self {
            msg_type: "handshake".to_string(),
            version: PROTOCOL_VERSION,
            peer_id: peer_id.to_string(),
            role: role.to_string(),
            address: None,
        }
    }

    /// Create a handshake advertising an address peers can dial back to.
    pub fn with_address(peer_id: &str, role: &str, address: &str) -> Self {
        Self {
            address: Some(address.to_string()),
            ..Self::new(peer_id, role)
        }
    }

    pub fn to_binary(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("handshake serialization should not fail")
    }

    /// Parse a handshake from raw bytes, rejecting anything that isn't
    /// valid JSON with `"type":"handshake"`.
    pub fn from_binary(data: &[u8]) -> Option<Self> {
        let msg: Self = serde_json::from_slice(data).ok()?;
        (msg.msg_type == "handshake").then_some(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_binary() {
        let hs = HandshakeMessage::with_address("peer-123", "server", "ws://a:8080");
        let bytes = hs.to_binary();
        let parsed = HandshakeMessage::from_binary(&bytes).unwrap();
        assert_eq!(parsed.peer_id, "peer-123");
        assert_eq!(parsed.role, "server");
        assert_eq!(parsed.address.as_deref(), Some("ws://a:8080"));
    }

    #[test]
    fn client_handshake_has_no_address() {
        let hs = HandshakeMessage::new("peer-123", "client");
        assert!(hs.address.is_none());
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(HandshakeMessage::from_binary(b"not json").is_none());
    }

    #[test]
    fn rejects_wrong_type() {
        let other = br#"{"type":"other","version":1,"peerId":"x","role":"server"}"#;
        assert!(HandshakeMessage::from_binary(other).is_none());
    }
}
