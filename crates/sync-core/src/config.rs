//! Known-peers config: `.sync/settings.json`.
//!
//! Distinct from the daemon's richer `known_peers.json` bookkeeping (last seen,
//! discovered-via, reconnect state) — this is the small, host-editable file a
//! user can hand-author to point a vault at peers, loaded on start and merged
//! with defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single entry in `knownPeers`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KnownPeerEntry {
    /// Connection URL, e.g. `ws://example.com:8080`.
    pub url: String,
    /// Human-readable label shown in UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// `.sync/settings.json` contents.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct KnownPeersConfig {
    #[serde(rename = "knownPeers", default)]
    pub known_peers: Vec<KnownPeerEntry>,
}

impl KnownPeersConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from raw JSON bytes, filtering invalid entries and deduplicating
    /// by normalized URL. Malformed top-level JSON returns an empty config
    /// rather than failing the caller — a corrupt settings file should not
    /// block sync.
    pub fn from_json(data: &[u8]) -> Self {
        let parsed: Self = serde_json::from_slice(data).unwrap_or_default();
        parsed.sanitized()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.sanitized())
    }

    /// Merge another config's entries in, deduplicated by normalized URL.
    /// Entries already present keep their existing label.
    pub fn merge(mut self, other: Self) -> Self {
        for entry in other.known_peers {
            if !self
                .known_peers
                .iter()
                .any(|e| normalize_url(&e.url) == normalize_url(&entry.url))
            {
                self.known_peers.push(entry);
            }
        }
        self.sanitized()
    }

    fn sanitized(&self) -> Self {
        let mut seen = HashSet::new();
        let mut known_peers = Vec::new();
        for entry in &self.known_peers {
            let trimmed = entry.url.trim();
            if trimmed.is_empty() {
                continue;
            }
            let key = normalize_url(trimmed);
            if seen.insert(key) {
                known_peers.push(KnownPeerEntry {
                    url: trimmed.to_string(),
                    label: entry.label.clone().filter(|l| !l.trim().is_empty()),
                });
            }
        }
        Self { known_peers }
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_ascii_lowercase()
}
