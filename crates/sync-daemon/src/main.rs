//! sync-daemon: Headless P2P sync daemon for home server.
//!
//! Uses the same sync-core as the Obsidian plugin, but runs as a native binary
//! with native filesystem and networking.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use sync_daemon::manager::{ConnectionManager, ManagerEvent};
use sync_daemon::native_fs::NativeFs;
use sync_daemon::persistence::{PeerStorage, PersistedPeer};
use sync_daemon::watcher::{FileEvent, FileEventKind, FileWatcher};
use sync_daemon::IncomingMessage;

use sync_core::config::KnownPeersConfig;
use sync_core::fs::FileSystem;
use sync_core::protocol::envelope::GossipMessage;
use sync_core::protocol::{detect_message_type, MessageType};
use sync_core::swim::{MembershipList, PeerInfo};
use sync_core::sync::{SyncEnvelope, SyncMessage};
use sync_core::sync_engine::Broadcaster;
use sync_core::{PeerId, Vault};

#[derive(Parser, Debug)]
#[command(name = "sync-daemon")]
#[command(about = "P2P vault sync daemon")]
struct Args {
    /// Path to the vault directory
    #[arg(short, long)]
    vault: PathBuf,

    /// Address to bind for incoming connections
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Address peers should dial back to reach us (omit to run client-only)
    #[arg(long)]
    public_addr: Option<String>,

    /// Peer ID (generated if not provided)
    #[arg(long)]
    peer_id: Option<String>,

    /// Additional peer to connect to on startup (repeatable)
    #[arg(long = "connect")]
    connect: Vec<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Wraps a sync message with whatever gossip has accumulated since the last
/// send, and bincode-encodes the envelope.
fn encode_envelope(membership: &mut MembershipList, message: SyncMessage) -> Vec<u8> {
    let gossip = membership.drain_gossip();
    SyncEnvelope::new(message, gossip)
        .to_bytes()
        .expect("sync envelope encoding should not fail")
}

/// Daemon state holding all components.
struct Daemon {
    vault: Vault<NativeFs>,
    manager: ConnectionManager,
    watcher: FileWatcher,
    membership: MembershipList,
    peer_storage: PeerStorage,
    broadcaster: Broadcaster,
}

impl Daemon {
    async fn on_file_event(&mut self, event: FileEvent) {
        match event.kind {
            FileEventKind::Modified => self.on_file_modified(&event.path).await,
            FileEventKind::Deleted => self.on_file_deleted(&event.path).await,
        }
    }

    async fn on_file_modified(&mut self, path: &str) {
        if let Err(e) = self.vault.on_file_changed(path).await {
            error!(path, error = %e, "failed to process file change");
            return;
        }

        if self.vault.is_sync_echo(path) {
            debug!(path, "skipping broadcast, sync echo");
            return;
        }

        if !self.broadcaster.allow(path) {
            debug!(path, "skipping broadcast, throttled");
            return;
        }

        match self.vault.prepare_document_update(path).await {
            Ok(Some(update)) => {
                self.vault.mark_synced(path);
                let bytes = encode_envelope(&mut self.membership, update);
                self.manager.broadcast(&bytes).await;
                info!(path, peers = self.manager.peer_count(), "broadcast document update");
            }
            Ok(None) => debug!(path, "no update to broadcast"),
            Err(e) => error!(path, error = %e, "failed to prepare document update"),
        }
    }

    async fn on_file_deleted(&mut self, path: &str) {
        let op = self.vault.prepare_file_deleted(path);
        if let Err(e) = self.vault.delete_file(path).await {
            error!(path, error = %e, "failed to tombstone deleted file");
            return;
        }
        let bytes = encode_envelope(&mut self.membership, SyncMessage::FileOp(op));
        self.manager.broadcast(&bytes).await;
        info!(path, "broadcast file deletion");
    }

    /// Handle a message from a peer, already resolved to their real peer ID.
    async fn on_message(&mut self, msg: IncomingMessage) {
        let peer_id_str = msg.temp_id;
        let Ok(peer_id) = peer_id_str.parse::<PeerId>() else {
            warn!(peer = %peer_id_str, "message from peer with unparseable id, dropping");
            return;
        };

        match detect_message_type(&msg.data) {
            MessageType::Json => {
                if let Some(gossip) = GossipMessage::from_json(&msg.data) {
                    self.handle_gossip(peer_id, gossip.updates).await;
                } else {
                    warn!(peer = %peer_id, "unrecognized JSON message, dropping");
                }
            }
            MessageType::Bincode => {
                let envelope = match SyncEnvelope::from_bytes(&msg.data) {
                    Ok(env) => env,
                    Err(e) => {
                        warn!(peer = %peer_id, error = %e, "failed to decode sync envelope");
                        return;
                    }
                };
                self.handle_gossip(peer_id, envelope.gossip).await;
                self.handle_sync_message(peer_id, envelope.message).await;
            }
            MessageType::Empty => {}
        }
    }

    async fn handle_gossip(&mut self, from: PeerId, updates: Vec<sync_core::swim::GossipUpdate>) {
        if updates.is_empty() {
            return;
        }
        let newly_alive = self.membership.process_gossip(&updates, from);
        for peer in newly_alive {
            self.persist_peer(&peer, Some(from));
            if peer.peer_id == self.membership.local_peer_id() {
                continue;
            }
            let Some(address) = peer.address.clone() else {
                continue;
            };
            info!(peer = %peer.peer_id, %address, "auto-connecting to peer discovered via gossip");
            if let Err(e) = self.manager.connect_to(&address).await {
                warn!(peer = %peer.peer_id, %address, error = %e, "auto-connect failed");
            }
        }
    }

    async fn handle_sync_message(&mut self, from: PeerId, message: SyncMessage) {
        match message {
            SyncMessage::SyncRequest(req) => match self.vault.process_sync_request(req).await {
                Ok(resp) => {
                    if resp.is_empty() {
                        return;
                    }
                    let bytes = encode_envelope(&mut self.membership, SyncMessage::SyncResponse(resp));
                    if let Err(e) = self.manager.send(&from.to_string(), &bytes).await {
                        error!(peer = %from, error = %e, "failed to send sync response");
                    }
                }
                Err(e) => error!(peer = %from, error = %e, "failed to process sync request"),
            },
            SyncMessage::SyncResponse(resp) => match self.vault.apply_sync_response(resp).await {
                Ok(modified) => {
                    if !modified.is_empty() {
                        info!(peer = %from, count = modified.len(), "applied sync response");
                    }
                }
                Err(e) => error!(peer = %from, error = %e, "failed to apply sync response"),
            },
            SyncMessage::DocumentUpdate { doc_id, data } => {
                match self.vault.apply_document_update(&doc_id, &data).await {
                    Ok(Some(path)) => info!(peer = %from, path, "applied document update"),
                    Ok(None) => debug!(peer = %from, doc_id, "document update deferred or no-op"),
                    Err(e) => error!(peer = %from, error = %e, "failed to apply document update"),
                }
            }
            SyncMessage::FileOp(op) => match self.vault.apply_remote_file_op(&op).await {
                Ok(path) => info!(peer = %from, path, "applied remote file op"),
                Err(e) => error!(peer = %from, error = %e, "failed to apply remote file op"),
            },
        }
    }

    async fn on_handshake_complete(
        &mut self,
        peer_id: String,
        address: Option<String>,
    ) {
        let Ok(parsed) = peer_id.parse::<PeerId>() else {
            warn!(peer = %peer_id, "handshake peer id is not a valid peer id, dropping");
            return;
        };

        self.membership.add(PeerInfo::new(parsed, address.clone()), 0);
        self.persist_peer(&PeerInfo::new(parsed, address), None);

        info!(peer = %peer_id, "peer connected, sending sync request");
        match self.vault.prepare_sync_request().await {
            Ok(req) => {
                let bytes = encode_envelope(&mut self.membership, SyncMessage::SyncRequest(req));
                if let Err(e) = self.manager.send(&peer_id, &bytes).await {
                    error!(peer = %peer_id, error = %e, "failed to send sync request");
                }
            }
            Err(e) => error!(peer = %peer_id, error = %e, "failed to prepare sync request"),
        }
    }

    fn on_connection_closed(&mut self, peer_id: &str) {
        info!(peer = %peer_id, "peer disconnected");
        if let Ok(parsed) = peer_id.parse::<PeerId>() {
            self.membership.mark_dead(parsed);
        }
    }

    /// Dispatch one manager event, regardless of which of the manager's two
    /// event sources it came from (`poll_events` or the dedup-close
    /// side-channel returned by `ConnectionManager::new`).
    async fn handle_manager_event(&mut self, event: ManagerEvent) {
        match event {
            ManagerEvent::Message(msg) => self.on_message(msg).await,
            ManagerEvent::HandshakeComplete { peer_id, address, .. } => {
                self.on_handshake_complete(peer_id, address).await;
            }
            ManagerEvent::ConnectionClosed { peer_id, .. } => {
                self.on_connection_closed(&peer_id);
            }
            ManagerEvent::PeerDiscovered { peer_id, address } => {
                debug!(peer = %peer_id, %address, "peer discovered event (unused, handled via gossip)");
            }
        }
    }

    fn persist_peer(&mut self, peer: &PeerInfo, discovered_via: Option<PeerId>) {
        let persisted = PersistedPeer::from_peer_info(peer, now_ms(), discovered_via);
        if let Err(e) = self.peer_storage.upsert(persisted) {
            warn!(peer = %peer.peer_id, error = %e, "failed to persist peer");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting sync-daemon");
    info!(vault = ?args.vault, listen = %args.listen, "configuration");

    let peer_id: PeerId = match args.peer_id.as_deref() {
        Some(s) => s.parse().context("invalid --peer-id")?,
        None => {
            let id = PeerId::generate();
            info!(peer_id = %id, "generated peer id");
            id
        }
    };

    let fs = NativeFs::new(args.vault.clone());

    let mut vault = if fs.exists(".sync").await? {
        info!("loading existing vault");
        Vault::load(fs, peer_id).await?
    } else {
        info!("initializing new vault");
        Vault::init(fs, peer_id).await?
    };
    let report = vault.reconcile().await?;
    if report.has_changes() {
        info!(
            indexed = report.indexed.len(),
            reindexed = report.reindexed.len(),
            moved = report.moved.len(),
            deleted = report.deleted.len(),
            "vault reconciled with filesystem"
        );
    }

    let (manager, mut manager_events) =
        ConnectionManager::new(peer_id.to_string(), args.public_addr.clone());
    let listener = ConnectionManager::bind(&args.listen).await?;

    let mut membership = MembershipList::new(peer_id, args.public_addr.clone());
    if let Some(addr) = &args.public_addr {
        membership.set_local_address(addr.clone());
    }

    let peer_storage = PeerStorage::new(&args.vault)?;

    let settings_path = args.vault.join(".sync/settings.json");
    let known_peers_config = match tokio::fs::read(&settings_path).await {
        Ok(bytes) => KnownPeersConfig::from_json(&bytes),
        Err(_) => KnownPeersConfig::new(),
    };

    let mut startup_addrs: Vec<String> = known_peers_config
        .known_peers
        .iter()
        .map(|p| p.url.clone())
        .collect();
    startup_addrs.extend(peer_storage.reconnectable().filter_map(|p| p.address.clone()));
    startup_addrs.extend(args.connect.iter().cloned());
    startup_addrs.sort();
    startup_addrs.dedup();

    let watcher = FileWatcher::new(args.vault.clone())?;
    info!("file watcher started");

    let mut daemon = Daemon {
        vault,
        manager,
        watcher,
        membership,
        peer_storage,
        broadcaster: Broadcaster::default(),
    };

    for addr in startup_addrs {
        info!(%addr, "connecting to known peer");
        if let Err(e) = daemon.manager.connect_to(&addr).await {
            warn!(%addr, error = %e, "failed to connect to known peer on startup");
        }
    }

    info!("daemon running, press Ctrl+C to stop");

    let mut reconnect_tick = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => daemon.manager.accept_incoming(stream, addr).await,
                    Err(e) => error!(error = %e, "failed to accept connection"),
                }
            }

            Some(event) = daemon.watcher.event_rx().recv() => {
                daemon.on_file_event(event).await;
            }

            // Primary event stream: handshakes, messages, closes.
            Some(event) = daemon.manager.poll_events() => {
                daemon.handle_manager_event(event).await;
            }

            // Side-channel for connections closed out-of-band by duplicate
            // connection resolution (see `ConnectionManager::close_connection`).
            Some(event) = manager_events.recv() => {
                daemon.handle_manager_event(event).await;
            }

            _ = reconnect_tick.tick() => {
                for addr in daemon.manager.check_reconnections(now_ms()) {
                    debug!(%addr, "attempting scheduled reconnect");
                    if let Err(e) = daemon.manager.connect_to(&addr).await {
                        debug!(%addr, error = %e, "reconnect attempt failed");
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!("shutting down");
    Ok(())
}
