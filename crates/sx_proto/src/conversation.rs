//! Conversation document.
//!
//! The three per-user maps (`publicKeys`, `typing`, `lastSeen`) are the only
//! fields both peers write. Every write is a merge patch touching a single
//! slot, so the peers never race on the same key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    /// Exactly two distinct user IDs, in creation order.
    pub participants: [String; 2],
    /// Base64 X25519 public key per participant; write-once per user.
    #[serde(default)]
    pub public_keys: BTreeMap<String, String>,
    /// Last typing ping per participant.
    #[serde(default)]
    pub typing: BTreeMap<String, Timestamp>,
    /// Last time each participant had the conversation open.
    #[serde(default)]
    pub last_seen: BTreeMap<String, Timestamp>,
    /// Listing / booking this conversation is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_ref: Option<String>,
    pub created_at: Timestamp,
    /// Other top-level fields written by the marketplace; kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Conversation {
    pub fn new(
        id: impl Into<String>,
        user_a: impl Into<String>,
        user_b: impl Into<String>,
        service_ref: Option<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            participants: [user_a.into(), user_b.into()],
            public_keys: BTreeMap::new(),
            typing: BTreeMap::new(),
            last_seen: BTreeMap::new(),
            service_ref,
            created_at,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// The other participant, or `None` if `user_id` is not one of them.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        match &self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }

    /// True if this conversation is between `a` and `b`, in either order.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        let [x, y] = &self.participants;
        (x == a && y == b) || (x == b && y == a)
    }
}

// ── Merge patches ────────────────────────────────────────────────────────────

/// A partial document merged into a conversation: top-level fields replace,
/// nested objects merge key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationPatch(Map<String, Value>);

impl ConversationPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn public_key(self, user_id: &str, key_b64: &str) -> Self {
        self.slot("publicKeys", user_id, Value::String(key_b64.to_string()))
    }

    pub fn typing(self, user_id: &str, at: Timestamp) -> Self {
        self.slot("typing", user_id, timestamp_value(at))
    }

    pub fn last_seen(self, user_id: &str, at: Timestamp) -> Self {
        self.slot("lastSeen", user_id, timestamp_value(at))
    }

    /// Arbitrary top-level field.
    pub fn field(mut self, name: &str, value: Value) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    fn slot(mut self, field: &str, user_id: &str, value: Value) -> Self {
        let entry = self
            .0
            .entry(field.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(map) = entry {
            map.insert(user_id.to_string(), value);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

fn timestamp_value(at: Timestamp) -> Value {
    serde_json::to_value(at).unwrap_or(Value::Null)
}

/// Merge `patch` into `target`. Objects merge recursively; any other value
/// (including arrays) replaces what was there.
pub fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(dst), Value::Object(src)) => {
            for (k, v) in src {
                let nested = v.is_object() && dst.get(k).map_or(false, Value::is_object);
                match dst.get_mut(k) {
                    Some(existing) if nested => merge_json(existing, v),
                    _ => {
                        dst.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (dst, src) => *dst = src.clone(),
    }
}
