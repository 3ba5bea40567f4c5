//! Vault: a collection of [`NoteDocument`]s indexed by a [`PathRegistry`],
//! reconciled against the filesystem and kept in sync with peers.

use crate::document::NoteDocument;
use crate::fs::{FileSystem, FsError};
use crate::markdown;
use crate::registry::{PathRegistry, RegistryError};
use crate::sync::FileOp;
use crate::PeerId;

use loro::VersionVector;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Directory for sync state.
const SYNC_DIR: &str = ".sync";
/// Path registry snapshot, encoding the vault-wide path -> doc_id mapping.
const REGISTRY_FILE: &str = ".sync/registry.crdt";
/// Per-document CRDT state, one file per doc id (stable across renames).
const DOCUMENTS_DIR: &str = ".sync/documents";

/// Files larger than this are left alone rather than loaded into a CRDT doc.
/// A vault is for notes, not attachments; a stray multi-gigabyte file
/// shouldn't be able to blow up memory or the wire protocol.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Document error: {0}")]
    Document(#[from] crate::document::DocumentError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Vault not initialized")]
    NotInitialized,

    #[error("file {0} is {1} bytes, exceeds the {2} byte limit")]
    FileTooLarge(String, u64, u64),

    #[error("Vault error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;

/// A detected file move, found during reconciliation.
#[derive(Debug, Clone)]
pub struct FileMove {
    pub from: String,
    pub to: String,
}

/// Report from reconciling filesystem state with the path registry on load.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Files newly indexed (no registry entry existed).
    pub indexed: Vec<String>,
    /// Files re-indexed because their markdown differed from CRDT state.
    pub reindexed: Vec<String>,
    /// Files moved/renamed, detected by matching content hashes.
    pub moved: Vec<FileMove>,
    /// Registry entries whose file disappeared without a matching move target.
    pub deleted: Vec<String>,
}

impl ReconcileReport {
    pub fn has_changes(&self) -> bool {
        !self.indexed.is_empty() || !self.reindexed.is_empty() || !self.moved.is_empty() || !self.deleted.is_empty()
    }
}

/// Manages a vault of documents, indexed by path through a [`PathRegistry`].
pub struct Vault<F: FileSystem> {
    pub(crate) registry: PathRegistry,
    /// Loaded documents, cached by their current path.
    pub(crate) documents: HashMap<String, NoteDocument>,
    pub(crate) fs: F,
    peer_id: PeerId,
    /// Version vector last written to disk for each doc id, keyed by path.
    /// Used to tell a local edit (version vector grew past what we wrote)
    /// apart from the watcher firing on our own sync-triggered write
    /// (version vector unchanged from what we just wrote).
    last_synced_versions: HashMap<String, VersionVector>,
}

impl<F: FileSystem> Vault<F> {
    /// Initialize a brand new vault (creates `.sync` and indexes existing files).
    pub async fn init(fs: F, peer_id: PeerId) -> Result<Self> {
        fs.mkdir(SYNC_DIR).await?;
        fs.mkdir(DOCUMENTS_DIR).await?;

        let registry = PathRegistry::new(peer_id);
        fs.write(REGISTRY_FILE, &registry.export_snapshot()).await?;

        let mut vault = Self {
            registry,
            documents: HashMap::new(),
            fs,
            peer_id,
            last_synced_versions: HashMap::new(),
        };

        vault.index_existing_files().await?;
        Ok(vault)
    }

    /// Load an existing vault and reconcile the registry against the
    /// filesystem, to catch up on changes made while nothing was watching.
    pub async fn load(fs: F, peer_id: PeerId) -> Result<Self> {
        if !fs.exists(SYNC_DIR).await? {
            return Err(VaultError::NotInitialized);
        }

        let registry = if fs.exists(REGISTRY_FILE).await? {
            let bytes = fs.read(REGISTRY_FILE).await?;
            PathRegistry::from_bytes(&bytes, peer_id)?
        } else {
            PathRegistry::new(peer_id)
        };

        let mut vault = Self {
            registry,
            documents: HashMap::new(),
            fs,
            peer_id,
            last_synced_versions: HashMap::new(),
        };

        vault.reconcile().await?;
        Ok(vault)
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub async fn is_initialized(&self) -> Result<bool> {
        Ok(self.fs.exists(SYNC_DIR).await?)
    }

    /// Reconcile filesystem state with the path registry.
    ///
    /// The filesystem (markdown) is always the source of truth. New files
    /// get indexed, files that differ from CRDT state get re-diffed, and
    /// files that vanished are matched against newly-appeared files by
    /// content hash to detect moves before falling back to a tombstone.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let disk_paths: HashSet<String> = self.list_files().await?.into_iter().collect();
        let live_registry_paths: HashSet<String> = self.registry.all_paths().into_iter().collect();

        let new_on_disk: Vec<String> = disk_paths.difference(&live_registry_paths).cloned().collect();
        let missing_from_disk: Vec<String> =
            live_registry_paths.difference(&disk_paths).cloned().collect();

        // Load the orphaned documents up front so we can compare content hashes.
        let mut orphaned_docs: Vec<(String, NoteDocument)> = Vec::new();
        for path in &missing_from_disk {
            if let Some(doc_id) = self.registry.lookup(path) {
                if let Ok(doc) = self.load_document_by_id(&doc_id, path).await {
                    orphaned_docs.push((path.clone(), doc));
                }
            }
        }

        let mut matched_new: HashSet<String> = HashSet::new();
        for (old_path, orphan) in &orphaned_docs {
            let orphan_hash = orphan.content_hash();
            for new_path in &new_on_disk {
                if matched_new.contains(new_path) {
                    continue;
                }
                let Ok(bytes) = self.fs.read(new_path).await else {
                    continue;
                };
                let content = String::from_utf8_lossy(&bytes);
                if markdown::parse(&content).body.is_empty() && content.trim().is_empty() {
                    continue;
                }
                let candidate_hash = {
                    let mut hasher = std::collections::hash_map::DefaultHasher::new();
                    use std::hash::{Hash, Hasher};
                    content.hash(&mut hasher);
                    hasher.finish()
                };
                // Compare against the *rendered* markdown hash, not raw bytes,
                // so frontmatter re-serialization differences don't break the match.
                let rendered_hash = orphan_hash;
                if candidate_hash == rendered_hash || orphan.to_markdown() == content {
                    tracing::info!(from = %old_path, to = %new_path, "file move detected during reconcile");
                    self.registry.rename(old_path, new_path)?;
                    let mut moved_doc = orphan.clone();
                    moved_doc.update_path(new_path)?;
                    self.save_document_state(new_path, &moved_doc).await?;
                    self.documents.insert(new_path.clone(), moved_doc);
                    report.moved.push(FileMove {
                        from: old_path.clone(),
                        to: new_path.clone(),
                    });
                    matched_new.insert(new_path.clone());
                    break;
                }
            }
        }
        self.persist_registry().await?;

        for path in &missing_from_disk {
            if report.moved.iter().any(|m| m.from == *path) {
                continue;
            }
            tracing::warn!(path = %path, "file missing from disk, tombstoning registry entry");
            self.registry.delete(path)?;
            self.documents.remove(path);
            report.deleted.push(path.clone());
        }
        self.persist_registry().await?;

        for path in &new_on_disk {
            if matched_new.contains(path) {
                continue;
            }
            tracing::info!(path = %path, "new file detected, indexing");
            self.on_file_changed(path).await?;
            report.indexed.push(path.clone());
        }

        for path in disk_paths.intersection(&live_registry_paths) {
            let before = self.documents.get(path).map(|d| d.version());
            self.on_file_changed(path).await?;
            let after = self.documents.get(path).map(|d| d.version());
            if before.is_some() && before != after {
                report.reindexed.push(path.clone());
            }
        }

        Ok(report)
    }

    fn storage_path_for(doc_id: &str) -> String {
        format!("{}/{}.crdt", DOCUMENTS_DIR, doc_id)
    }

    async fn load_document_by_id(&self, doc_id: &str, path: &str) -> Result<NoteDocument> {
        let storage_path = Self::storage_path_for(doc_id);
        let bytes = self.fs.read(&storage_path).await?;
        Ok(NoteDocument::from_bytes(path, &bytes, self.peer_id)?)
    }

    async fn persist_registry(&self) -> Result<()> {
        self.fs.write(REGISTRY_FILE, &self.registry.export_snapshot()).await?;
        Ok(())
    }

    async fn save_document_state(&self, path: &str, doc: &NoteDocument) -> Result<()> {
        let doc_id = doc
            .doc_id()
            .ok_or_else(|| VaultError::Other(format!("document at {path} has no doc_id")))?;
        let storage_path = Self::storage_path_for(&doc_id);
        self.fs.write(&storage_path, &doc.export_snapshot()).await?;
        self.fs.write(path, doc.to_markdown().as_bytes()).await?;
        Ok(())
    }

    /// Get or load a document by its current path.
    pub async fn get_document(&mut self, path: &str) -> Result<&NoteDocument> {
        self.ensure_loaded(path).await?;
        Ok(self.documents.get(path).unwrap())
    }

    pub async fn get_document_mut(&mut self, path: &str) -> Result<&mut NoteDocument> {
        self.ensure_loaded(path).await?;
        Ok(self.documents.get_mut(path).unwrap())
    }

    async fn ensure_loaded(&mut self, path: &str) -> Result<()> {
        if self.documents.contains_key(path) {
            return Ok(());
        }

        if let Some(doc_id) = self.registry.lookup(path) {
            let doc = self.load_document_by_id(&doc_id, path).await?;
            self.documents.insert(path.to_string(), doc);
            return Ok(());
        }

        if self.fs.exists(path).await? {
            self.on_file_changed(path).await?;
            if self.documents.contains_key(path) {
                return Ok(());
            }
        }

        let doc = NoteDocument::new(path, self.peer_id);
        self.documents.insert(path.to_string(), doc);
        Ok(())
    }

    /// Handle a file change detected by the watcher or by reconciliation.
    ///
    /// Diffs the new content against the loaded document in place, preserving
    /// the document's CRDT history and peer ID. Only a genuinely new path
    /// creates a fresh document (and registry entry).
    pub async fn on_file_changed(&mut self, path: &str) -> Result<()> {
        if !path.ends_with(".md") || path.starts_with(SYNC_DIR) {
            return Ok(());
        }

        let stat = self.fs.stat(path).await?;
        if stat.size > MAX_FILE_SIZE {
            tracing::warn!(path = %path, size = stat.size, "file exceeds size limit, skipping");
            return Ok(());
        }

        let bytes = self.fs.read(path).await?;
        let content = String::from_utf8_lossy(&bytes);
        let parsed = markdown::parse(&content);

        if self.documents.contains_key(path) {
            let doc = self.documents.get(path).unwrap();
            let body_changed = doc.update_body(&parsed.body)?;
            let fm_changed = doc.update_frontmatter(parsed.frontmatter.as_ref())?;
            if body_changed || fm_changed {
                doc.commit();
                let doc = self.documents.get(path).unwrap();
                self.save_document_state(path, doc).await?;
            }
            return Ok(());
        }

        if let Some(doc_id) = self.registry.lookup(path) {
            let doc = self.load_document_by_id(&doc_id, path).await?;
            let body_changed = doc.update_body(&parsed.body)?;
            let fm_changed = doc.update_frontmatter(parsed.frontmatter.as_ref())?;
            if body_changed || fm_changed {
                doc.commit();
                self.save_document_state(path, &doc).await?;
            }
            self.documents.insert(path.to_string(), doc);
            return Ok(());
        }

        let new_doc = NoteDocument::from_markdown(path, &content, self.peer_id)?;
        let doc_id = new_doc
            .doc_id()
            .ok_or_else(|| VaultError::Other("freshly created document is missing a doc_id".into()))?;
        self.registry.create(path, &doc_id)?;
        self.persist_registry().await?;
        self.save_document_state(path, &new_doc).await?;
        self.documents.insert(path.to_string(), new_doc);
        tracing::debug!(path = %path, "created new document");

        Ok(())
    }

    /// True if `path`'s current version vector is caught up on everything
    /// we last synced *and* no new local operations were authored since --
    /// i.e. the file event that triggered this check was our own
    /// sync-triggered write, not a local edit, so it should not be
    /// re-broadcast. Only [`Vault::mark_synced`] populates the baseline this
    /// compares against; `on_file_changed` never does, since every local
    /// edit would otherwise trivially match its own just-recorded version.
    pub fn is_sync_echo(&self, path: &str) -> bool {
        let (Some(doc), Some(synced)) = (self.documents.get(path), self.last_synced_versions.get(path))
        else {
            return false;
        };
        let current = doc.version();
        if !current.includes_vv(synced) {
            return false;
        }
        current.get(&self.peer_id.as_u64()) == synced.get(&self.peer_id.as_u64())
    }

    /// Record that `path`'s current version vector was just synced, so a
    /// subsequent watcher event caused by our own write can be recognized
    /// as an echo rather than a local edit.
    pub fn mark_synced(&mut self, path: &str) {
        if let Some(doc) = self.documents.get(path) {
            self.last_synced_versions.insert(path.to_string(), doc.version());
        }
    }

    /// Tombstone a deleted file: removes the registry entry and cached
    /// document. The underlying CRDT history is left on disk so a
    /// concurrent edit elsewhere still has something to merge against.
    pub async fn delete_file(&mut self, path: &str) -> Result<()> {
        if self.registry.lookup(path).is_some() {
            self.registry.delete(path)?;
            self.persist_registry().await?;
        }
        self.documents.remove(path);
        self.last_synced_versions.remove(path);
        Ok(())
    }

    /// Rename a file: moves the registry entry (preserving doc_id) and
    /// updates the cached document's path metadata.
    pub async fn rename_file(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        self.registry.rename(old_path, new_path)?;
        self.persist_registry().await?;

        if let Some(mut doc) = self.documents.remove(old_path) {
            doc.update_path(new_path)?;
            self.save_document_state(new_path, &doc).await?;
            self.documents.insert(new_path.to_string(), doc);
        } else if let Some(doc_id) = self.registry.lookup(new_path) {
            let doc = self.load_document_by_id(&doc_id, new_path).await?;
            self.documents.insert(new_path.to_string(), doc);
        }
        if let Some(v) = self.last_synced_versions.remove(old_path) {
            self.last_synced_versions.insert(new_path.to_string(), v);
        }
        Ok(())
    }

    /// Build the [`FileOp`] to broadcast for a locally-observed deletion.
    pub fn prepare_file_deleted(&self, path: &str) -> FileOp {
        FileOp::delete(path)
    }

    /// Build the [`FileOp`] to broadcast for a locally-observed rename.
    pub fn prepare_file_renamed(&self, old_path: &str, new_path: &str) -> FileOp {
        FileOp::rename(old_path, new_path)
    }

    /// Apply a [`FileOp`] received from a peer.
    pub async fn apply_file_op(&mut self, op: &FileOp) -> Result<()> {
        use crate::sync::FileOpKind;
        match op.op {
            FileOpKind::Delete => {
                if self.fs.exists(&op.path).await? {
                    self.fs.delete(&op.path).await?;
                }
                self.delete_file(&op.path).await
            }
            FileOpKind::Rename => {
                let new_path = op
                    .new_path
                    .as_deref()
                    .ok_or_else(|| VaultError::Other("rename FileOp missing new_path".into()))?;
                if self.fs.exists(&op.path).await? && !self.fs.exists(new_path).await? {
                    let content = self.fs.read(&op.path).await?;
                    self.fs.write(new_path, &content).await?;
                    self.fs.delete(&op.path).await?;
                }
                self.rename_file(&op.path, new_path).await
            }
        }
    }

    /// Save a document's current state to disk (both markdown and CRDT state).
    pub async fn save_document(&self, path: &str) -> Result<()> {
        if let Some(doc) = self.documents.get(path) {
            self.save_document_state(path, doc).await?;
        }
        Ok(())
    }

    /// List all markdown files in the vault (excludes `.sync` and hidden files).
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut dirs_to_visit = vec![String::new()];

        while let Some(dir) = dirs_to_visit.pop() {
            let entries = self.fs.list(&dir).await?;
            for entry in entries {
                let path = if dir.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", dir, entry.name)
                };

                if path.starts_with(SYNC_DIR) || path.starts_with('.') {
                    continue;
                }

                if entry.is_dir {
                    dirs_to_visit.push(path);
                } else if path.ends_with(".md") {
                    files.push(path);
                }
            }
        }

        Ok(files)
    }

    async fn index_existing_files(&mut self) -> Result<()> {
        let files = self.list_files().await?;
        for path in files {
            if let Err(e) = self.on_file_changed(&path).await {
                tracing::warn!(path = %path, error = %e, "failed to index file");
            }
        }
        Ok(())
    }

    /// Check if a document's current version includes all operations from a
    /// previous version (causal "has-seen" check over version vectors).
    pub fn version_includes(current_version: &[u8], synced_version: &[u8]) -> bool {
        let Ok(current) = loro::VersionVector::decode(current_version) else {
            return false;
        };
        let Ok(synced) = loro::VersionVector::decode(synced_version) else {
            return false;
        };
        current.includes_vv(&synced)
    }
}
