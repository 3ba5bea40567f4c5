//! Versioned handshake protocol.
//!
//! The handshake is sent immediately after WebSocket connection is established.
//! It includes:
//! - Protocol version for forward compatibility
//! - Peer ID (unique identifier)
//! - Role (server or client)
//! - Address for incoming connections (None for client-only)

use crate::PeerId;
use serde::{Deserialize, Serialize};

/// Current protocol version.
///
/// Increment when making breaking changes to the protocol.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on any single message accepted off the wire (handshake, sync
/// exchange, or gossip), post-detection. Guards against a misbehaving or
/// malicious peer forcing an unbounded allocation.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Role in the P2P mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandshakeRole {
    /// Can accept incoming connections (daemons, desktop plugins)
    Server,
    /// Can only connect outgoing (iOS, NAT without port forwarding)
    Client,
}

impl HandshakeRole {
    /// Check if this role can accept incoming connections.
    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server)
    }

    /// Check if this role is client-only.
    pub fn is_client(&self) -> bool {
        matches!(self, Self::Client)
    }
}

/// Versioned handshake message.
///
/// Sent immediately after WebSocket connection is established.
/// Both peers send their handshake, then continue with SWIM gossip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Message type discriminator
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Protocol version
    pub version: u32,
    /// Peer's unique identifier
    pub peer_id: PeerId,
    /// Role in the connection
    pub role: HandshakeRole,
    /// Advertised address for incoming connections (None = client-only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Handshake {
    /// Create a new handshake for a server-capable peer.
    pub fn server(peer_id: PeerId, address: String) -> Self {
        Self {
            msg_type: "handshake".to_string(),
            version: PROTOCOL_VERSION,
            peer_id,
            role: HandshakeRole::Server,
            address: Some(address),
        }
    }

    /// Create a new handshake for a client-only peer.
    pub fn client(peer_id: PeerId) -> Self {
        Self {
            msg_type: "handshake".to_string(),
            version: PROTOCOL_VERSION,
            peer_id,
            role: HandshakeRole::Client,
            address: None,
        }
    }

    /// Create a handshake with explicit parameters.
    pub fn new(peer_id: PeerId, role: HandshakeRole, address: Option<String>) -> Self {
        Self {
            msg_type: "handshake".to_string(),
            version: PROTOCOL_VERSION,
            peer_id,
            role,
            address,
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Handshake serialization should not fail")
    }

    /// Try to parse from JSON bytes.
    pub fn from_json(data: &[u8]) -> Option<Self> {
        let handshake: Self = serde_json::from_slice(data).ok()?;

        // Verify it's actually a handshake
        if handshake.msg_type == "handshake" {
            Some(handshake)
        } else {
            None
        }
    }

    /// Check if this is compatible with our version.
    ///
    /// Currently accepts any version (graceful degradation).
    /// Future versions may reject incompatible protocols.
    pub fn is_compatible(&self) -> bool {
        // Accept any version for now - we'll add strict checking later if needed
        true
    }

    /// Check if we should log a version mismatch warning.
    pub fn should_warn_version(&self) -> bool {
        self.version != PROTOCOL_VERSION
    }

    /// Check if this peer can accept incoming connections.
    pub fn is_server(&self) -> bool {
        self.role.is_server() && self.address.is_some()
    }

    /// Check if this peer is client-only.
    pub fn is_client_only(&self) -> bool {
        self.role.is_client() || self.address.is_none()
    }
}
