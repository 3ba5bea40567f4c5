//! Peer registry for tracking connected peers.
//!
//! Provides `PeerRegistry` for tracking peer connection state and `ConnectedPeer` for peer metadata.
//! Platform-specific implementations handle thread safety:
//! - Native: `Arc<PeerRegistry>` with `RwLock` for multi-threaded Tokio runtime
//! - WASM: `Rc<PeerRegistry>` with `RefCell` for single-threaded browser environment

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during peer operations.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Peer ID cannot be empty")]
    EmptyId,
    #[error("Unknown connection ID: {0}")]
    UnknownConnection(String),
}

/// Connection state for a peer.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// WebSocket open, awaiting handshake
    Connecting,
    /// Handshake complete, fully connected
    Connected,
    /// Connection closed
    Disconnected,
}

/// Reason for disconnection.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DisconnectReason {
    /// disconnect() called by user
    UserRequested,
    /// WebSocket error
    NetworkError,
    /// Remote peer closed the connection
    RemoteClosed,
    /// Invalid handshake or protocol violation
    ProtocolError,
    /// Duplicate connection detected (simultaneous connect)
    DuplicateConnection,
}

/// Result of checking for duplicate connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateCheckResult {
    /// No duplicate - proceed with connection
    NoDuplicate,
    /// Duplicate detected - close this connection (we have lower peer_id, keep outgoing)
    CloseThis,
    /// Duplicate detected - close the other connection (we have higher peer_id, keep incoming).
    /// The caller should look up the existing connection_id from its peer-to-connection mapping.
    CloseOther,
}

/// Check if we should close a connection due to simultaneous connect.
///
/// When two peers connect to each other simultaneously, we need to close one:
/// - Lower peer_id keeps their outgoing connection
/// - Higher peer_id keeps the incoming connection
///
/// This ensures both sides agree on which connection to keep.
pub fn check_duplicate_connection(
    our_peer_id: &str,
    their_peer_id: &str,
    new_direction: ConnectionDirection,
    existing_direction: Option<ConnectionDirection>,
) -> DuplicateCheckResult {
    // No existing connection = no duplicate
    let existing_dir = match existing_direction {
        Some(dir) => dir,
        None => return DuplicateCheckResult::NoDuplicate,
    };

    // Same direction = not a simultaneous connect, handle as reconnect
    if new_direction == existing_dir {
        return DuplicateCheckResult::NoDuplicate;
    }

    // Different directions = simultaneous connect
    // Lower peer_id wins with outgoing, higher peer_id wins with incoming
    if our_peer_id < their_peer_id {
        // We have lower ID - we keep outgoing
        if new_direction == ConnectionDirection::Incoming {
            // This is the incoming we should reject
            DuplicateCheckResult::CloseThis
        } else {
            // This is our outgoing - close the incoming
            DuplicateCheckResult::CloseOther
        }
    } else {
        // We have higher ID - we keep incoming
        if new_direction == ConnectionDirection::Outgoing {
            // This is our outgoing we should close
            DuplicateCheckResult::CloseThis
        } else {
            // This is incoming - close our outgoing
            DuplicateCheckResult::CloseOther
        }
    }
}

/// Connection direction from our perspective.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionDirection {
    Incoming,
    Outgoing,
}

/// Tracked state for a peer in the registry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPeer {
    /// Peer's unique identifier (from handshake)
    pub id: String,
    /// Connection address (IP:port or URL)
    pub address: String,
    /// Connection direction
    pub direction: ConnectionDirection,
    /// Connection state
    pub state: ConnectionState,
    /// Reason for disconnection (if disconnected)
    pub disconnect_reason: Option<DisconnectReason>,
    /// When first seen this session (ms since epoch)
    pub first_seen: f64,
    /// When last activity observed (ms since epoch)
    pub last_seen: f64,
    /// Times this peer has connected this session
    pub connection_count: u32,
}

// ============================================================================
// Native (multi-threaded) implementation
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod platform {
    use super::*;
    use std::sync::RwLock;

    /// Registry for tracking connected peers.
    ///
    /// Thread-safe for use in multi-threaded Tokio runtime.
    /// Wrap in `Arc` for shared ownership.
    pub struct PeerRegistry {
        peers: RwLock<HashMap<String, ConnectedPeer>>,
        /// Maps connection IDs to peer IDs (for pre-handshake → post-handshake resolution)
        connections: RwLock<HashMap<String, String>>,
    }

    impl Default for PeerRegistry {
        fn default() -> Self {
            Self {
                peers: RwLock::new(HashMap::new()),
                connections: RwLock::new(HashMap::new()),
            }
        }
    }

    impl PeerRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        /// Record a connection. If peer exists, increments connection_count and updates timestamps.
        ///
        /// Returns an error if the peer ID is empty.
        pub fn peer_connected(
            &self,
            id: String,
            address: String,
            direction: ConnectionDirection,
            timestamp: f64,
        ) -> Result<ConnectedPeer, super::PeerError> {
            if id.is_empty() {
                return Err(super::PeerError::EmptyId);
            }

            let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());

            let peer = if let Some(peer) = peers.get_mut(&id) {
                // Existing peer
                if peer.state == ConnectionState::Connected {
                    // Duplicate connect - idempotent, just update activity
                    peer.last_seen = timestamp;
                    peer.address = address;
                    peer.direction = direction;
                } else {
                    // Reconnection
                    peer.state = ConnectionState::Connected;
                    peer.disconnect_reason = None;
                    peer.connection_count += 1;
                    peer.last_seen = timestamp;
                    peer.address = address;
                    peer.direction = direction;
                }
                peer.clone()
            } else {
                // New peer
                let peer = ConnectedPeer {
                    id: id.clone(),
                    address,
                    direction,
                    state: ConnectionState::Connected,
                    disconnect_reason: None,
                    first_seen: timestamp,
                    last_seen: timestamp,
                    connection_count: 1,
                };
                peers.insert(id, peer.clone());
                peer
            };

            Ok(peer)
        }

        /// Mark peer as disconnected (keeps in registry, sets state to Disconnected).
        ///
        /// Can disconnect by either peer ID or connection ID (for pre-handshake disconnects).
        pub fn peer_disconnected(
            &self,
            id: &str,
            reason: DisconnectReason,
            timestamp: f64,
        ) -> bool {
            let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
            let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());

            // Try to resolve connection ID to peer ID
            let peer_id = connections.get(id).map(|s| s.as_str()).unwrap_or(id);

            if let Some(peer) = peers.get_mut(peer_id) {
                peer.state = ConnectionState::Disconnected;
                peer.disconnect_reason = Some(reason);
                peer.last_seen = timestamp;
                true
            } else {
                false
            }
        }

        /// Update last_seen timestamp.
        pub fn touch(&self, id: &str, timestamp: f64) {
            let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
            if let Some(peer) = peers.get_mut(id) {
                peer.last_seen = timestamp;
            }
        }

        /// All peers seen this session.
        pub fn get_known_peers(&self) -> Vec<ConnectedPeer> {
            self.peers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .values()
                .cloned()
                .collect()
        }

        /// Specific peer info.
        pub fn get_peer(&self, id: &str) -> Option<ConnectedPeer> {
            self.peers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(id)
                .cloned()
        }

        /// Currently connected peers only.
        pub fn get_connected_peers(&self) -> Vec<ConnectedPeer> {
            self.peers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .values()
                .filter(|p| p.state == ConnectionState::Connected)
                .cloned()
                .collect()
        }

        /// Check if peer is currently connected.
        pub fn is_connected(&self, id: &str) -> bool {
            self.peers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(id)
                .map(|p| p.state == ConnectionState::Connected)
                .unwrap_or(false)
        }

        /// Called when WebSocket opens (before handshake).
        /// Creates peer in Connecting state, indexed by connection ID.
        pub fn peer_connecting(
            &self,
            connection_id: String,
            address: String,
            direction: ConnectionDirection,
            timestamp: f64,
        ) -> ConnectedPeer {
            let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
            let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());

            // Map connection_id to itself initially (before handshake)
            connections.insert(connection_id.clone(), connection_id.clone());

            let peer = ConnectedPeer {
                id: connection_id.clone(),
                address,
                direction,
                state: ConnectionState::Connecting,
                disconnect_reason: None,
                first_seen: timestamp,
                last_seen: timestamp,
                connection_count: 1,
            };
            peers.insert(connection_id, peer.clone());
            peer
        }

        /// Called when handshake completes. Maps connection_id to real peer_id.
        /// Returns error if connection_id unknown.
        pub fn peer_handshake_complete(
            &self,
            connection_id: &str,
            peer_id: String,
            timestamp: f64,
        ) -> Result<ConnectedPeer, super::PeerError> {
            let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
            let mut connections = self.connections.write().unwrap_or_else(|e| e.into_inner());

            // Get the existing connecting peer
            let mut peer = peers
                .remove(connection_id)
                .ok_or_else(|| super::PeerError::UnknownConnection(connection_id.to_string()))?;

            // Update to connected state with real peer ID
            peer.id = peer_id.clone();
            peer.state = ConnectionState::Connected;
            peer.last_seen = timestamp;

            // Update connection mapping
            connections.insert(connection_id.to_string(), peer_id.clone());

            // Re-insert under real peer ID
            peers.insert(peer_id, peer.clone());

            Ok(peer)
        }

        /// Get peer by connection ID (for pre-handshake lookups).
        pub fn get_peer_by_connection_id(&self, connection_id: &str) -> Option<ConnectedPeer> {
            let connections = self.connections.read().unwrap_or_else(|e| e.into_inner());
            let peer_id = connections.get(connection_id)?;
            self.peers
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(peer_id)
                .cloned()
        }

        /// Resolve connection ID to peer ID (returns connection_id if no mapping).
        pub fn resolve_peer_id(&self, connection_id: &str) -> String {
            self.connections
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(connection_id)
                .cloned()
                .unwrap_or_else(|| connection_id.to_string())
        }
    }
}

// ============================================================================
// WASM (single-threaded) implementation
// ============================================================================

#[cfg(target_arch = "wasm32")]
mod platform {
    use super::*;
    use std::cell::RefCell;

    /// Registry for tracking connected peers.
    ///
    /// Single-threaded for WASM browser environment.
    /// Wrap in `Rc` for shared ownership.
    pub struct PeerRegistry {
        peers: RefCell<HashMap<String, ConnectedPeer>>,
        /// Maps connection IDs to peer IDs (for pre-handshake → post-handshake resolution)
        connections: RefCell<HashMap<String, String>>,
    }

    impl Default for PeerRegistry {
        fn default() -> Self {
            Self {
                peers: RefCell::new(HashMap::new()),
                connections: RefCell::new(HashMap::new()),
            }
        }
    }

    impl PeerRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        /// Record a connection. If peer exists, increments connection_count and updates timestamps.
        ///
        /// Returns an error if the peer ID is empty.
        pub fn peer_connected(
            &self,
            id: String,
            address: String,
            direction: ConnectionDirection,
            timestamp: f64,
        ) -> Result<ConnectedPeer, super::PeerError> {
            if id.is_empty() {
                return Err(super::PeerError::EmptyId);
            }

            let mut peers = self.peers.borrow_mut();

            let peer = if let Some(peer) = peers.get_mut(&id) {
                // Existing peer
                if peer.state == ConnectionState::Connected {
                    // Duplicate connect - idempotent, just update activity
                    peer.last_seen = timestamp;
                    peer.address = address;
                    peer.direction = direction;
                } else {
                    // Reconnection
                    peer.state = ConnectionState::Connected;
                    peer.disconnect_reason = None;
                    peer.connection_count += 1;
                    peer.last_seen = timestamp;
                    peer.address = address;
                    peer.direction = direction;
                }
                peer.clone()
            } else {
                // New peer
                let peer = ConnectedPeer {
                    id: id.clone(),
                    address,
                    direction,
                    state: ConnectionState::Connected,
                    disconnect_reason: None,
                    first_seen: timestamp,
                    last_seen: timestamp,
                    connection_count: 1,
                };
                peers.insert(id, peer.clone());
                peer
            };

            Ok(peer)
        }

        /// Mark peer as disconnected (keeps in registry, sets state to Disconnected).
        ///
        /// Can disconnect by either peer ID or connection ID (for pre-handshake disconnects).
        pub fn peer_disconnected(
            &self,
            id: &str,
            reason: DisconnectReason,
            timestamp: f64,
        ) -> bool {
            let mut peers = self.peers.borrow_mut();
            let connections = self.connections.borrow();

            // Try to resolve connection ID to peer ID
            let peer_id = connections.get(id).map(|s| s.as_str()).unwrap_or(id);

            if let Some(peer) = peers.get_mut(peer_id) {
                peer.state = ConnectionState::Disconnected;
                peer.disconnect_reason = Some(reason);
                peer.last_seen = timestamp;
                true
            } else {
                false
            }
        }

        /// Update last_seen timestamp.
        pub fn touch(&self, id: &str, timestamp: f64) {
            let mut peers = self.peers.borrow_mut();
            if let Some(peer) = peers.get_mut(id) {
                peer.last_seen = timestamp;
            }
        }

        /// All peers seen this session.
        pub fn get_known_peers(&self) -> Vec<ConnectedPeer> {
            self.peers.borrow().values().cloned().collect()
        }

        /// Specific peer info.
        pub fn get_peer(&self, id: &str) -> Option<ConnectedPeer> {
            self.peers.borrow().get(id).cloned()
        }

        /// Currently connected peers only.
        pub fn get_connected_peers(&self) -> Vec<ConnectedPeer> {
            self.peers
                .borrow()
                .values()
                .filter(|p| p.state == ConnectionState::Connected)
                .cloned()
                .collect()
        }

        /// Check if peer is currently connected.
        pub fn is_connected(&self, id: &str) -> bool {
            self.peers
                .borrow()
                .get(id)
                .map(|p| p.state == ConnectionState::Connected)
                .unwrap_or(false)
        }

        /// Called when WebSocket opens (before handshake).
        /// Creates peer in Connecting state, indexed by connection ID.
        pub fn peer_connecting(
            &self,
            connection_id: String,
            address: String,
            direction: ConnectionDirection,
            timestamp: f64,
        ) -> ConnectedPeer {
            let mut peers = self.peers.borrow_mut();
            let mut connections = self.connections.borrow_mut();

            // Map connection_id to itself initially (before handshake)
            connections.insert(connection_id.clone(), connection_id.clone());

            let peer = ConnectedPeer {
                id: connection_id.clone(),
                address,
                direction,
                state: ConnectionState::Connecting,
                disconnect_reason: None,
                first_seen: timestamp,
                last_seen: timestamp,
                connection_count: 1,
            };
            peers.insert(connection_id, peer.clone());
            peer
        }

        /// Called when handshake completes. Maps connection_id to real peer_id.
        /// Returns error if connection_id unknown.
        pub fn peer_handshake_complete(
            &self,
            connection_id: &str,
            peer_id: String,
            timestamp: f64,
        ) -> Result<ConnectedPeer, super::PeerError> {
            let mut peers = self.peers.borrow_mut();
            let mut connections = self.connections.borrow_mut();

            // Get the existing connecting peer
            let mut peer = peers
                .remove(connection_id)
                .ok_or_else(|| super::PeerError::UnknownConnection(connection_id.to_string()))?;

            // Update to connected state with real peer ID
            peer.id = peer_id.clone();
            peer.state = ConnectionState::Connected;
            peer.last_seen = timestamp;

            // Update connection mapping
            connections.insert(connection_id.to_string(), peer_id.clone());

            // Re-insert under real peer ID
            peers.insert(peer_id, peer.clone());

            Ok(peer)
        }

        /// Get peer by connection ID (for pre-handshake lookups).
        pub fn get_peer_by_connection_id(&self, connection_id: &str) -> Option<ConnectedPeer> {
            let connections = self.connections.borrow();
            let peer_id = connections.get(connection_id)?;
            self.peers.borrow().get(peer_id).cloned()
        }

        /// Resolve connection ID to peer ID (returns connection_id if no mapping).
        pub fn resolve_peer_id(&self, connection_id: &str) -> String {
            self.connections
                .borrow()
                .get(connection_id)
                .cloned()
                .unwrap_or_else(|| connection_id.to_string())
        }
    }
}

pub use platform::*;
