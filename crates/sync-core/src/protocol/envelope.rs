//! Wire protocol envelope types for peer-to-peer messages.
//!
//! These types define the JSON wire format for gossip and sync messages
//! exchanged between peers. They replace ad-hoc `serde_json::json!()`
//! construction and manual JSON parsing with typed structs.
//!
//! The handshake message is handled separately in [`super::handshake`]
//! since it operates at the connection level, not the message level.

use crate::swim::GossipUpdate;
use serde::{Deserialize, Serialize};

/// A standalone gossip message containing SWIM membership updates.
///
/// Wire format: `{"type":"gossip","updates":[...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipMessage {
    #[serde(rename = "type")]
    msg_type: String,
    pub updates: Vec<GossipUpdate>,
}

impl GossipMessage {
    /// Create a new gossip message wrapping the given updates.
    pub fn new(updates: Vec<GossipUpdate>) -> Self {
        Self {
            msg_type: "gossip".to_string(),
            updates,
        }
    }

    /// Serialize to JSON bytes.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("GossipMessage serialization should not fail")
    }

    /// Try to parse from JSON bytes.
    ///
    /// Returns `None` for non-JSON input or if the `type` field isn't `"gossip"`.
    pub fn from_json(data: &[u8]) -> Option<Self> {
        let msg: Self = serde_json::from_slice(data).ok()?;
        if msg.msg_type == "gossip" {
            Some(msg)
        } else {
            None
        }
    }
}
