// Deny holding RefCell borrows across await points - causes WASM panics
#![deny(clippy::await_holding_refcell_ref)]

//! sync-core: Shared Rust library for P2P vault synchronization using Loro CRDTs.
//!
//! This crate provides the core functionality for:
//! - Managing Loro documents for markdown notes
//! - Parsing/serializing markdown with frontmatter
//! - Sync protocol between peers
//! - FileSystem and SyncTransport trait abstractions

pub mod config;
pub mod document;
pub mod events;
pub mod fs;
pub mod markdown;
pub mod peer_id;
pub mod peers;
pub mod protocol;
pub mod registry;
pub mod sync;
pub mod sync_engine;
pub mod swim;
pub mod transport;
pub mod vault;

pub use config::{KnownPeerEntry, KnownPeersConfig};
pub use document::NoteDocument;
pub use events::{EventBus, Subscription, SyncEvent};
pub use fs::{FileEntry, FileStat, FileSystem, InMemoryFs};
pub use peer_id::{PeerId, PeerIdError};
pub use peers::{ConnectedPeer, ConnectionDirection, PeerError, PeerRegistry};
pub use protocol::{detect_message_type, Handshake, HandshakeRole, MessageType, MAX_MESSAGE_SIZE};
pub use registry::{PathRegistry, RegistryError};
pub use sync::{FileOp, FileOpKind, SyncEnvelope, SyncMessage, SyncRequest, SyncResponse};
pub use transport::{PeerConnection, PeerInfo, SyncTransport};
pub use vault::{Vault, VaultError};
