//! Persistence for known peers.
//!
//! Stores peer information to disk for recovery after restarts.
//! Peers are stored in `.sync/known_peers.json` within the vault directory.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use sync_core::peer_id::PeerId;
use sync_core::swim::PeerInfo;

/// Persisted peer information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedPeer {
    /// Peer ID
    pub peer_id: String,
    /// Address for connecting (None for client-only peers)
    pub address: Option<String>,
    /// Last time we were connected (unix timestamp ms)
    pub last_seen: u64,
    /// Peer ID of who told us about this peer (for debugging)
    pub discovered_via: Option<String>,
}

impl PersistedPeer {
    /// Create from PeerInfo and current time.
    pub fn from_peer_info(info: &PeerInfo, now_ms: u64, discovered_via: Option<PeerId>) -> Self {
        Self {
            peer_id: info.peer_id.to_string(),
            address: info.address.clone(),
            last_seen: now_ms,
            discovered_via: discovered_via.map(|p| p.to_string()),
        }
    }

    /// Convert back to PeerInfo.
    pub fn to_peer_info(&self) -> Result<PeerInfo> {
        let peer_id: PeerId = self.peer_id.parse()?;
        Ok(PeerInfo {
            peer_id,
            address: self.address.clone(),
        })
    }
}

/// Collection of persisted peers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistedPeers {
    /// All known peers.
    pub peers: Vec<PersistedPeer>,
}

impl PersistedPeers {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self { peers: Vec::new() }
    }

    /// Add or update a peer.
    pub fn upsert(&mut self, peer: PersistedPeer) {
        if let Some(existing) = self.peers.iter_mut().find(|p| p.peer_id == peer.peer_id) {
            // Update existing peer
            existing.address = peer.address;
            existing.last_seen = peer.last_seen;
            if peer.discovered_via.is_some() {
                existing.discovered_via = peer.discovered_via;
            }
        } else {
            // Add new peer
            self.peers.push(peer);
        }
    }

    /// Remove a peer by ID.
    pub fn remove(&mut self, peer_id: &str) {
        self.peers.retain(|p| p.peer_id != peer_id);
    }

    /// Get a peer by ID.
    pub fn get(&self, peer_id: &str) -> Option<&PersistedPeer> {
        self.peers.iter().find(|p| p.peer_id == peer_id)
    }

    /// Get all peers with addresses (can be reconnected to).
    pub fn reconnectable(&self) -> impl Iterator<Item = &PersistedPeer> {
        self.peers.iter().filter(|p| p.address.is_some())
    }
}

/// Storage for persisted peers.
pub struct PeerStorage {
    /// Path to the storage file.
    path: PathBuf,
    /// In-memory cache.
    peers: PersistedPeers,
}

impl PeerStorage {
    /// Create storage at the specified vault directory.
    ///
    /// Creates `.sync/known_peers.json` within the vault.
    pub fn new(vault_path: &Path) -> Result<Self> {
        let sync_dir = vault_path.join(".sync");
        let path = sync_dir.join("known_peers.json");

        let mut storage = Self {
            path,
            peers: PersistedPeers::new(),
        };

        // Try to load existing data
        if let Ok(loaded) = storage.load() {
            storage.peers = loaded;
        }

        Ok(storage)
    }

    /// Load peers from disk.
    pub fn load(&self) -> Result<PersistedPeers> {
        if !self.path.exists() {
            return Ok(PersistedPeers::new());
        }

        let contents = fs::read_to_string(&self.path)?;
        let peers: PersistedPeers = serde_json::from_str(&contents)?;
        Ok(peers)
    }

    /// Save current peers to disk.
    pub fn save(&self) -> Result<()> {
        // Ensure directory exists
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(&self.peers)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }

    /// Add or update a peer.
    pub fn upsert(&mut self, peer: PersistedPeer) -> Result<()> {
        self.peers.upsert(peer);
        self.save()
    }

    /// Remove a peer.
    pub fn remove(&mut self, peer_id: &str) -> Result<()> {
        self.peers.remove(peer_id);
        self.save()
    }

    /// Get a peer by ID.
    pub fn get(&self, peer_id: &str) -> Option<&PersistedPeer> {
        self.peers.get(peer_id)
    }

    /// Get all reconnectable peers.
    pub fn reconnectable(&self) -> impl Iterator<Item = &PersistedPeer> {
        self.peers.reconnectable()
    }

    /// Get all peers.
    pub fn all(&self) -> &[PersistedPeer] {
        &self.peers.peers
    }
}
