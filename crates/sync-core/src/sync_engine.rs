//! Sync engine: turns [`Vault`] state into wire messages and back.
//!
//! The protocol is a straightforward request/response exchange plus
//! unsolicited pushes:
//!
//! 1. On connect, each side sends a [`SyncRequest`] with its registry
//!    version vector and the version vector of every document it knows.
//! 2. The peer receiving a request replies with a [`SyncResponse`]: a
//!    registry delta (if the requester's registry version is behind), a
//!    delta for every document the requester already has but is missing
//!    updates for, and a full snapshot for every document the requester has
//!    never seen.
//! 3. Applying a response imports the registry delta first (so renames are
//!    visible), then imports each document delta/snapshot, writing the
//!    result back to disk.
//! 4. On a local file change, the editing peer broadcasts a
//!    [`SyncMessage::DocumentUpdate`] to every connected peer.
//! 5. Deletes and renames that have no CRDT delta of their own travel as
//!    [`FileOp`] messages instead.
//!
//! Unlike the request/response exchange, which is idempotent because it is
//! driven by version vectors, `DocumentUpdate` broadcasts are throttled per
//! path by [`Broadcaster`] so a burst of keystrokes doesn't turn into a
//! burst of network sends.

use crate::fs::FileSystem;
use crate::sync::{FileOp, SyncRequest, SyncResponse};
use crate::vault::Vault;

use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;
#[cfg(target_arch = "wasm32")]
use web_time::Instant;

#[derive(Debug, Error)]
pub enum SyncEngineError {
    #[error("Vault error: {0}")]
    Vault(#[from] crate::vault::VaultError),

    #[error("Document error: {0}")]
    Document(#[from] crate::document::DocumentError),
}

pub type Result<T> = std::result::Result<T, SyncEngineError>;

/// Per-path throttle for outbound `DocumentUpdate` broadcasts.
///
/// Keeps at most one send per path in flight per `min_interval`; callers
/// that fire faster than that should coalesce and let the next allowed tick
/// carry the latest state, rather than queuing every intermediate edit.
pub struct Broadcaster {
    min_interval: Duration,
    last_sent: HashMap<String, Instant>,
}

impl Broadcaster {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: HashMap::new(),
        }
    }

    /// Returns true if a broadcast for `path` is allowed right now, and
    /// records that one was sent. Call this immediately before sending.
    pub fn allow(&mut self, path: &str) -> bool {
        let now = Instant::now();
        match self.last_sent.get(path) {
            Some(last) if now.duration_since(*last) < self.min_interval => false,
            _ => {
                self.last_sent.insert(path.to_string(), now);
                true
            }
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl<F: FileSystem> Vault<F> {
    /// Build a [`SyncRequest`] describing what we already have, for a peer
    /// to diff against.
    pub async fn prepare_sync_request(&mut self) -> Result<SyncRequest> {
        let registry_version = self.registry.encode_version();

        let mut document_versions = HashMap::new();
        let paths = self.list_files().await?;
        for path in paths {
            let Some(doc_id) = self.doc_id_for(&path).await? else {
                continue;
            };
            let doc = self.get_document(&path).await?;
            document_versions.insert(doc_id, doc.version().encode());
        }

        Ok(SyncRequest::new(registry_version, document_versions))
    }

    /// Answer a peer's [`SyncRequest`] with everything they're missing.
    pub async fn process_sync_request(&mut self, req: SyncRequest) -> Result<SyncResponse> {
        let registry_delta = match loro::VersionVector::decode(&req.registry_version) {
            Ok(their_vv) => {
                let delta = self.registry.export_updates(&their_vv);
                if delta.is_empty() {
                    None
                } else {
                    Some(delta)
                }
            }
            Err(_) => Some(self.registry.export_snapshot()),
        };

        let mut per_doc_deltas = HashMap::new();
        let mut new_docs = HashMap::new();

        let paths = self.list_files().await?;
        for path in paths {
            let Some(doc_id) = self.doc_id_for(&path).await? else {
                continue;
            };
            let doc = self.get_document(&path).await?;

            match req.document_versions.get(&doc_id) {
                Some(their_version) => {
                    if let Ok(their_vv) = loro::VersionVector::decode(their_version) {
                        let updates = doc.export_updates(&their_vv);
                        if !updates.is_empty() {
                            per_doc_deltas.insert(doc_id, updates);
                        }
                    } else {
                        new_docs.insert(doc_id, doc.export_snapshot());
                    }
                }
                None => {
                    new_docs.insert(doc_id, doc.export_snapshot());
                }
            }
        }

        Ok(SyncResponse {
            registry_delta,
            per_doc_deltas,
            new_docs,
        })
    }

    /// Apply a [`SyncResponse`] received from a peer. Returns the paths that
    /// were modified.
    pub async fn apply_sync_response(&mut self, resp: SyncResponse) -> Result<Vec<String>> {
        if let Some(delta) = &resp.registry_delta {
            self.registry.import(delta)?;
            let snapshot = self.registry.export_snapshot();
            self.fs
                .write(".sync/registry.crdt", &snapshot)
                .await
                .map_err(crate::vault::VaultError::from)?;
        }

        let mut modified = Vec::new();

        for (doc_id, data) in resp.new_docs.into_iter().chain(resp.per_doc_deltas) {
            if let Some(path) = self.apply_document_delta(&doc_id, &data).await? {
                modified.push(path);
            }
        }

        Ok(modified)
    }

    /// Prepare a [`SyncMessage::DocumentUpdate`] broadcast for a local
    /// change. Returns `None` if the document has no doc_id yet (shouldn't
    /// happen once it's been through `on_file_changed`).
    pub async fn prepare_document_update(&mut self, path: &str) -> Result<Option<crate::sync::SyncMessage>> {
        let Some(doc_id) = self.doc_id_for(path).await? else {
            return Ok(None);
        };
        let doc = self.get_document(path).await?;
        let snapshot = doc.export_snapshot();
        Ok(Some(crate::sync::SyncMessage::document_update(doc_id, snapshot)))
    }

    /// Apply an incoming `DocumentUpdate`. Returns the current path of the
    /// document if it was modified, so callers can skip re-broadcasting it.
    pub async fn apply_document_update(&mut self, doc_id: &str, data: &[u8]) -> Result<Option<String>> {
        self.apply_document_delta(doc_id, data).await
    }

    async fn apply_document_delta(&mut self, doc_id: &str, data: &[u8]) -> Result<Option<String>> {
        let existing_path = self.path_for_doc_id(doc_id);

        if let Some(path) = existing_path {
            let doc = self.get_document_mut(&path).await?;
            let before = doc.version();
            doc.import(data)?;
            let after = doc.version();
            if before == after {
                return Ok(None);
            }
            self.save_document(&path).await?;
            self.mark_synced(&path);
            debug!(path = %path, "applied document delta");
            return Ok(Some(path));
        }

        // We don't have this doc_id at all yet -- a fresh snapshot, but we
        // have no path for it until the registry delta that names it has
        // also been applied. Skip silently; a follow-up sync round will
        // find the path once the registry agrees, and `new_docs` snapshots
        // are harmless to re-send.
        debug!(doc_id = %doc_id, "received update for unknown doc_id, deferring");
        Ok(None)
    }

    /// Apply a [`FileOp`] received from a peer, returning the affected path
    /// (the new path for a rename, the deleted path for a delete) so callers
    /// can suppress echoing it back out.
    pub async fn apply_remote_file_op(&mut self, op: &FileOp) -> Result<String> {
        use crate::sync::FileOpKind;
        self.apply_file_op(op).await?;
        Ok(match op.op {
            FileOpKind::Delete => op.path.clone(),
            FileOpKind::Rename => op.new_path.clone().unwrap_or_else(|| op.path.clone()),
        })
    }

    fn path_for_doc_id(&self, doc_id: &str) -> Option<String> {
        self.registry.resolve_doc_id(doc_id)
    }

    async fn doc_id_for(&mut self, path: &str) -> Result<Option<String>> {
        if let Some(id) = self.registry.lookup(path) {
            return Ok(Some(id));
        }
        // Not indexed yet -- index it now so it participates in this round.
        self.on_file_changed(path).await?;
        Ok(self.registry.lookup(path))
    }

    /// Deduplicate a set of candidate broadcast targets against paths we
    /// just received updates for in the same tick, so a sync round doesn't
    /// immediately re-broadcast what it just imported.
    pub fn exclude_just_received(paths: Vec<String>, received: &HashSet<String>) -> Vec<String> {
        paths.into_iter().filter(|p| !received.contains(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use crate::PeerId;

    fn peer(n: u64) -> PeerId {
        PeerId::from(n)
    }

    #[tokio::test]
    async fn test_sync_between_vaults() {
        let fs1 = InMemoryFs::new();
        let fs2 = InMemoryFs::new();

        fs1.write("file1.md", b"# From Vault 1").await.unwrap();
        fs2.write("file2.md", b"# From Vault 2").await.unwrap();

        let mut vault1 = Vault::init(fs1, peer(1)).await.unwrap();
        let mut vault2 = Vault::init(fs2, peer(2)).await.unwrap();

        let request1 = vault1.prepare_sync_request().await.unwrap();
        let response_for_1 = vault2.process_sync_request(request1).await.unwrap();
        let modified1 = vault1.apply_sync_response(response_for_1).await.unwrap();
        assert!(modified1.contains(&"file2.md".to_string()));

        let request2 = vault2.prepare_sync_request().await.unwrap();
        let response_for_2 = vault1.process_sync_request(request2).await.unwrap();
        let modified2 = vault2.apply_sync_response(response_for_2).await.unwrap();
        assert!(modified2.contains(&"file1.md".to_string()));

        let doc1_in_vault2 = vault2.get_document("file1.md").await.unwrap();
        assert!(doc1_in_vault2.to_markdown().contains("From Vault 1"));

        let doc2_in_vault1 = vault1.get_document("file2.md").await.unwrap();
        assert!(doc2_in_vault1.to_markdown().contains("From Vault 2"));
    }

    #[tokio::test]
    async fn test_resync_is_idempotent() {
        let fs1 = InMemoryFs::new();
        let fs2 = InMemoryFs::new();

        fs1.write("note.md", b"# Original").await.unwrap();
        let mut vault1 = Vault::init(fs1, peer(1)).await.unwrap();
        let mut vault2 = Vault::init(fs2, peer(2)).await.unwrap();

        let req = vault2.prepare_sync_request().await.unwrap();
        let resp = vault1.process_sync_request(req).await.unwrap();
        let modified = vault2.apply_sync_response(resp).await.unwrap();
        assert!(modified.contains(&"note.md".to_string()));

        let req2 = vault2.prepare_sync_request().await.unwrap();
        let resp2 = vault1.process_sync_request(req2).await.unwrap();
        let modified2 = vault2.apply_sync_response(resp2).await.unwrap();
        assert!(modified2.is_empty(), "resync with nothing new should be a no-op");
    }

    #[tokio::test]
    async fn test_document_update_broadcast_roundtrip() {
        let fs1 = InMemoryFs::new();
        let fs2 = InMemoryFs::new();

        let mut vault1 = Vault::init(fs1, peer(1)).await.unwrap();
        let mut vault2 = Vault::init(fs2, peer(2)).await.unwrap();

        vault1.fs.write("note.md", b"Initial content").await.unwrap();
        vault1.on_file_changed("note.md").await.unwrap();

        let req = vault2.prepare_sync_request().await.unwrap();
        let resp = vault1.process_sync_request(req).await.unwrap();
        vault2.apply_sync_response(resp).await.unwrap();

        vault1.fs.write("note.md", b"Updated content").await.unwrap();
        vault1.on_file_changed("note.md").await.unwrap();

        let update = vault1.prepare_document_update("note.md").await.unwrap().unwrap();
        let crate::sync::SyncMessage::DocumentUpdate { doc_id, data } = update else {
            panic!("expected DocumentUpdate");
        };

        let modified_path = vault2.apply_document_update(&doc_id, &data).await.unwrap();
        assert_eq!(modified_path.as_deref(), Some("note.md"));

        let doc = vault2.get_document("note.md").await.unwrap();
        assert!(doc.to_markdown().contains("Updated content"));
    }

    #[tokio::test]
    async fn test_file_op_delete_propagates() {
        let fs1 = InMemoryFs::new();
        let fs2 = InMemoryFs::new();

        let mut vault1 = Vault::init(fs1, peer(1)).await.unwrap();
        let mut vault2 = Vault::init(fs2, peer(2)).await.unwrap();

        vault1.fs.write("note.md", b"Hello").await.unwrap();
        vault1.on_file_changed("note.md").await.unwrap();

        let req = vault2.prepare_sync_request().await.unwrap();
        let resp = vault1.process_sync_request(req).await.unwrap();
        vault2.apply_sync_response(resp).await.unwrap();
        assert!(vault2.registry.lookup("note.md").is_some());

        let op = vault1.prepare_file_deleted("note.md");
        vault1.delete_file("note.md").await.unwrap();

        vault2.apply_file_op(&op).await.unwrap();
        assert_eq!(vault2.registry.lookup("note.md"), None);
    }

    #[tokio::test]
    async fn test_broadcaster_throttles_same_path() {
        let mut b = Broadcaster::new(Duration::from_secs(60));
        assert!(b.allow("note.md"));
        assert!(!b.allow("note.md"));
        assert!(b.allow("other.md"));
    }
}
