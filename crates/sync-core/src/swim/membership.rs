//! Membership list for tracking known peers.
//!
//! The membership list is the core data structure for SWIM. It tracks:
//! - All known peers in the mesh
//! - Their current state (Alive, Suspected, Dead)
//! - Incarnation numbers for conflict resolution

use super::{GossipUpdate, PeerInfo};
use crate::PeerId;
use std::collections::HashMap;

/// Maximum number of pending gossip updates before oldest are dropped
const MAX_GOSSIP_QUEUE_SIZE: usize = 100;

/// State of a member in the membership list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    /// Peer is believed to be alive
    Alive,
    /// Peer failed to respond, might be dead
    Suspected,
    /// Peer confirmed dead (failed to refute suspicion)
    Dead,
    /// Peer explicitly removed from mesh
    Removed,
}

/// A member in the membership list.
#[derive(Debug, Clone)]
pub struct Member {
    /// Peer information
    pub info: PeerInfo,
    /// Current state
    pub state: MemberState,
    /// Incarnation number (increases when refuting suspicion)
    pub incarnation: u64,
    /// Which peer told us about this member (for debugging/tracing)
    pub discovered_via: Option<PeerId>,
}

impl Member {
    /// Create a new alive member.
    pub fn new(info: PeerInfo, incarnation: u64) -> Self {
        Self {
            info,
            state: MemberState::Alive,
            incarnation,
            discovered_via: None,
        }
    }

    /// Create a new member discovered via another peer.
    pub fn discovered_from(info: PeerInfo, incarnation: u64, via: PeerId) -> Self {
        Self {
            info,
            state: MemberState::Alive,
            incarnation,
            discovered_via: Some(via),
        }
    }

    /// Check if this member is connectable (has an address).
    pub fn is_server(&self) -> bool {
        self.info.address.is_some()
    }

    /// Check if this member is client-only (no address).
    pub fn is_client_only(&self) -> bool {
        self.info.address.is_none()
    }
}

/// Membership list tracking all known peers.
///
/// This is the core data structure for SWIM gossip. It handles:
/// - Adding/removing members
/// - Processing gossip updates
/// - Generating gossip to send
pub struct MembershipList {
    /// Our own peer ID
    local_peer_id: PeerId,
    /// Our incarnation number (increases when we refute suspicion)
    local_incarnation: u64,
    /// Our advertised address (None = client-only)
    local_address: Option<String>,
    /// All known members indexed by peer ID
    members: HashMap<PeerId, Member>,
    /// Pending gossip updates to propagate
    pending_gossip: Vec<GossipUpdate>,
    /// Maximum gossip updates to piggyback per message
    gossip_fanout: usize,
}

impl MembershipList {
    /// Create a new membership list with default incarnation (1).
    pub fn new(local_peer_id: PeerId, local_address: Option<String>) -> Self {
        Self::with_incarnation(local_peer_id, local_address, 1)
    }

    /// Create a new membership list with a specific incarnation number.
    ///
    /// Use this when restoring from persisted state to maintain incarnation
    /// continuity across restarts.
    pub fn with_incarnation(
        local_peer_id: PeerId,
        local_address: Option<String>,
        incarnation: u64,
    ) -> Self {
        Self {
            local_peer_id,
            local_incarnation: incarnation,
            local_address,
            members: HashMap::new(),
            pending_gossip: Vec::new(),
            gossip_fanout: 3,
        }
    }

    /// Get our local peer ID.
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Get our local incarnation.
    pub fn local_incarnation(&self) -> u64 {
        self.local_incarnation
    }

    /// Get our local PeerInfo.
    pub fn local_info(&self) -> PeerInfo {
        PeerInfo::new(self.local_peer_id, self.local_address.clone())
    }

    /// Set the gossip fanout (max updates per message).
    pub fn set_gossip_fanout(&mut self, fanout: usize) {
        self.gossip_fanout = fanout;
    }

    /// Update our local address after construction.
    ///
    /// Use this when the server port is only known after startup.
    pub fn set_local_address(&mut self, address: String) {
        self.local_address = Some(address);
    }

    /// Add a member to the list.
    ///
    /// Returns true if this is a new member or state changed.
    pub fn add(&mut self, info: PeerInfo, incarnation: u64) -> bool {
        self.add_impl(info, incarnation, None)
    }

    /// Add a member discovered from another peer.
    pub fn add_discovered(&mut self, info: PeerInfo, incarnation: u64, via: PeerId) -> bool {
        self.add_impl(info, incarnation, Some(via))
    }

    fn add_impl(&mut self, info: PeerInfo, incarnation: u64, via: Option<PeerId>) -> bool {
        let peer_id = info.peer_id;

        // Ignore updates about ourselves
        if peer_id == self.local_peer_id {
            return false;
        }

        if let Some(existing) = self.members.get_mut(&peer_id) {
            // Never resurrect Removed peers via gossip - they must reconnect directly
            if existing.state == MemberState::Removed {
                return false;
            }

            // Update if incarnation is higher
            if incarnation > existing.incarnation {
                existing.info = info;
                existing.incarnation = incarnation;
                existing.state = MemberState::Alive;
                if via.is_some() {
                    existing.discovered_via = via;
                }
                return true;
            }

            // Same incarnation: handle state transitions and address merging
            if incarnation == existing.incarnation {
                let mut changed = false;

                if existing.state != MemberState::Alive {
                    existing.state = MemberState::Alive;
                    changed = true;
                }

                // Merge address when existing has none (e.g., handshake registered
                // peer without address, then gossip arrives with it)
                if existing.info.address.is_none() && info.address.is_some() {
                    existing.info.address = info.address;
                    changed = true;
                }

                if changed {
                    if via.is_some() {
                        existing.discovered_via = via;
                    }
                }

                return changed;
            }

            false
        } else {
            // New member
            let member = match via {
                Some(v) => Member::discovered_from(info, incarnation, v),
                None => Member::new(info, incarnation),
            };
            self.members.insert(peer_id, member);
            true
        }
    }

    /// Remove a member from the list.
    ///
    /// Returns the removed member if it existed.
    pub fn remove(&mut self, peer_id: PeerId) -> Option<Member> {
        // Don't remove ourselves
        if peer_id == self.local_peer_id {
            return None;
        }
        self.members.remove(&peer_id)
    }

    /// Get a member by peer ID.
    pub fn get(&self, peer_id: &PeerId) -> Option<&Member> {
        self.members.get(peer_id)
    }

    /// Get a mutable reference to a member.
    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut Member> {
        self.members.get_mut(peer_id)
    }

    /// Check if a peer is in the list.
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.members.contains_key(peer_id)
    }

    /// Get all members.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Get all alive members.
    pub fn alive_members(&self) -> impl Iterator<Item = &Member> {
        self.members
            .values()
            .filter(|m| m.state == MemberState::Alive)
    }

    /// Get all members with addresses (server-capable peers).
    pub fn server_members(&self) -> impl Iterator<Item = &Member> {
        self.members.values().filter(|m| m.is_server())
    }

    /// Check if a peer is removed (collective forgetting).
    ///
    /// Returns true if the peer is in the list and marked as Removed.
    /// We should NOT attempt to reconnect to removed peers.
    pub fn is_removed(&self, peer_id: &PeerId) -> bool {
        self.members
            .get(peer_id)
            .map(|m| m.state == MemberState::Removed)
            .unwrap_or(false)
    }

    /// Check if a peer is dead (failure detected).
    ///
    /// Returns true if the peer is in the list and marked as Dead.
    /// Unlike Removed, we MAY attempt to reconnect to dead peers.
    pub fn is_dead(&self, peer_id: &PeerId) -> bool {
        self.members
            .get(peer_id)
            .map(|m| m.state == MemberState::Dead)
            .unwrap_or(false)
    }

    /// Get peers that should be reconnected to.
    /// Returns server peers that we should attempt to reconnect to.
    ///
    /// Includes Alive and Dead peers (failure detection means we should retry).
    /// Excludes Removed peers (collective forgetting means no auto-reconnect).
    /// Excludes client-only peers (they can't accept incoming connections).
    pub fn reconnectable_peers(&self) -> impl Iterator<Item = &Member> {
        self.members.values().filter(|m| {
            m.state != MemberState::Removed
                && m.is_server()
        })
    }

    /// Number of members (excluding ourselves).
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Mark a peer as suspected.
    ///
    /// Returns true if state changed.
    pub fn suspect(&mut self, peer_id: PeerId, incarnation: u64) -> bool {
        if peer_id == self.local_peer_id {
            // We're being suspected - refute by increasing incarnation
            // Use saturating_add to prevent overflow attacks
            self.local_incarnation = self.local_incarnation.max(incarnation).saturating_add(1);
            self.queue_gossip(GossipUpdate::alive(self.local_info(), self.local_incarnation));
            return false;
        }

        if let Some(member) = self.members.get_mut(&peer_id) {
            // Only suspect if incarnation matches and currently alive
            if incarnation >= member.incarnation && member.state == MemberState::Alive {
                member.state = MemberState::Suspected;
                member.incarnation = incarnation;
                return true;
            }
        }
        false
    }

    /// Mark a peer as dead.
    ///
    /// Returns true if state changed.
    pub fn mark_dead(&mut self, peer_id: PeerId) -> bool {
        if peer_id == self.local_peer_id {
            return false;
        }

        if let Some(member) = self.members.get_mut(&peer_id)
            && member.state != MemberState::Dead
        {
            member.state = MemberState::Dead;
            return true;
        }
        false
    }

    /// Mark a peer as dead, only if incarnation matches or is newer.
    ///
    /// This prevents stale dead messages from incorrectly marking alive peers.
    /// Returns true if state changed.
    pub fn mark_dead_with_incarnation(&mut self, peer_id: PeerId, incarnation: u64) -> bool {
        if peer_id == self.local_peer_id {
            return false;
        }

        if let Some(member) = self.members.get_mut(&peer_id) {
            // Only accept if incarnation matches or is newer, and not already dead
            if incarnation >= member.incarnation && member.state != MemberState::Dead {
                member.state = MemberState::Dead;
                member.incarnation = incarnation;
                return true;
            }
        }
        false
    }

    /// Mark a peer as explicitly removed (collective forgetting).
    ///
    /// Automatically queues a `Removed` gossip update for propagation.
    /// Returns true if state changed.
    pub fn mark_removed(&mut self, peer_id: PeerId) -> bool {
        if peer_id == self.local_peer_id {
            return false;
        }

        if let Some(member) = self.members.get_mut(&peer_id)
            && member.state != MemberState::Removed
        {
            member.state = MemberState::Removed;
            // Queue gossip so Removed state spreads through the mesh
            self.queue_gossip(GossipUpdate::removed(peer_id));
            return true;
        }
        false
    }

    /// Queue a gossip update for propagation.
    pub fn queue_gossip(&mut self, update: GossipUpdate) {
        // Drop oldest if queue is full (FIFO eviction)
        if self.pending_gossip.len() >= MAX_GOSSIP_QUEUE_SIZE {
            self.pending_gossip.remove(0);
        }
        self.pending_gossip.push(update);
    }

    /// Get gossip updates to piggyback on the next message.
    ///
    /// Returns up to `gossip_fanout` updates and removes them from the queue.
    pub fn drain_gossip(&mut self) -> Vec<GossipUpdate> {
        let count = self.gossip_fanout.min(self.pending_gossip.len());
        self.pending_gossip.drain(0..count).collect()
    }

    /// Process incoming gossip updates.
    ///
    /// Returns list of newly discovered peers (for auto-connect).
    pub fn process_gossip(&mut self, updates: &[GossipUpdate], from: PeerId) -> Vec<PeerInfo> {
        let mut new_peers = Vec::new();

        for update in updates {
            match update {
                GossipUpdate::Alive { peer, incarnation } => {
                    let was_new = self.add_discovered(peer.clone(), *incarnation, from);
                    if was_new && peer.peer_id != self.local_peer_id {
                        new_peers.push(peer.clone());
                    }
                }
                GossipUpdate::Suspect {
                    peer_id,
                    incarnation,
                } => {
                    self.suspect(*peer_id, *incarnation);
                }
                GossipUpdate::Dead { peer_id, incarnation } => {
                    self.mark_dead_with_incarnation(*peer_id, *incarnation);
                }
                GossipUpdate::Removed { peer_id } => {
                    self.mark_removed(*peer_id);
                }
            }
        }

        new_peers
    }

    /// Generate Alive gossip updates for all known members.
    ///
    /// Used when responding to a new peer to share full membership.
    pub fn generate_full_gossip(&self) -> Vec<GossipUpdate> {
        // Start with ourselves
        let mut updates = vec![GossipUpdate::alive(self.local_info(), self.local_incarnation)];

        // Add all alive members
        for member in self.alive_members() {
            updates.push(GossipUpdate::alive(member.info.clone(), member.incarnation));
        }

        updates
    }

    /// Pick a random alive member for pinging.
    ///
    /// Returns None if no alive members.
    pub fn pick_random_member(&self) -> Option<&Member> {
        use rand::seq::IndexedRandom;

        let alive: Vec<_> = self.alive_members().collect();
        alive.choose(&mut rand::rng()).copied()
    }

    /// Pick K random members for indirect pinging.
    ///
    /// Excludes the target peer. Returns fewer than K if not enough members.
    pub fn pick_k_random_members(&self, k: usize, exclude: PeerId) -> Vec<&Member> {
        use rand::seq::SliceRandom;

        let mut candidates: Vec<_> = self
            .alive_members()
            .filter(|m| m.info.peer_id != exclude)
            .collect();

        candidates.shuffle(&mut rand::rng());
        candidates.truncate(k);
        candidates
    }
}
