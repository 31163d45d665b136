//! Sealed message records.
//!
//! A message is append-only: once the store accepts it, no field changes.
//! The store never sees plaintext, only the AEAD ciphertext and its nonce.

use serde::{Deserialize, Serialize};

use crate::Timestamp;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
}

/// Message as stored and delivered by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    /// base64url(ct || tag)
    pub ciphertext: String,
    /// base64url(12-byte nonce)
    pub nonce: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    pub created_at: Timestamp,
}

/// Message as submitted by a sender; the store assigns `id` and `createdAt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub ciphertext: String,
    pub nonce: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
}

impl NewMessage {
    pub fn text(
        conversation_id: impl Into<String>,
        sender_id: impl Into<String>,
        ciphertext: impl Into<String>,
        nonce: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            sender_id: sender_id.into(),
            ciphertext: ciphertext.into(),
            nonce: nonce.into(),
            kind: MessageKind::Text,
        }
    }
}

/// Order messages by `createdAt`. Stable: messages with equal timestamps
/// keep the order the store delivered them in.
pub fn sort_chronologically(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.created_at);
}
