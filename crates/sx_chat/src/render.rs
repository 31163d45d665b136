//! Decrypted transcript rendering.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use sx_crypto::{decrypt_text, SharedKey};
use sx_proto::{sort_chronologically, Message, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub message_id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at: Timestamp,
    pub outgoing: bool,
}

struct Decrypted {
    ciphertext: String,
    nonce: String,
    /// `None` if the message failed to decrypt.
    text: Option<String>,
}

/// Turns message snapshots into a transcript, decrypting each message once.
/// Messages that fail to decrypt are left out; the rest still render.
pub struct TranscriptRenderer {
    viewer_id: String,
    cache: HashMap<String, Decrypted>,
}

impl TranscriptRenderer {
    pub fn new(viewer_id: impl Into<String>) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            cache: HashMap::new(),
        }
    }

    pub fn render(&mut self, key: &SharedKey, mut messages: Vec<Message>) -> Vec<TranscriptEntry> {
        sort_chronologically(&mut messages);
        messages
            .into_iter()
            .filter_map(|m| {
                let text = self.decrypt_cached(key, &m)?;
                Some(TranscriptEntry {
                    outgoing: m.sender_id == self.viewer_id,
                    message_id: m.id,
                    sender_id: m.sender_id,
                    text,
                    created_at: m.created_at,
                })
            })
            .collect()
    }

    fn decrypt_cached(&mut self, key: &SharedKey, message: &Message) -> Option<String> {
        if let Some(hit) = self.cache.get(&message.id) {
            if hit.ciphertext == message.ciphertext && hit.nonce == message.nonce {
                return hit.text.clone();
            }
        }

        let text = match decrypt_text(key, &message.ciphertext, &message.nonce) {
            Ok(plain) => Some(plain.as_str().to_owned()),
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    conversation_id = %message.conversation_id,
                    error = %e,
                    "message failed to decrypt; omitted from transcript"
                );
                None
            }
        };
        self.cache.insert(
            message.id.clone(),
            Decrypted {
                ciphertext: message.ciphertext.clone(),
                nonce: message.nonce.clone(),
                text: text.clone(),
            },
        );
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use sx_crypto::{derive_shared_key, encrypt, DeviceKeyPair};
    use sx_proto::MessageKind;

    fn key_pair() -> (SharedKey, SharedKey) {
        let a = DeviceKeyPair::generate().unwrap();
        let b = DeviceKeyPair::generate().unwrap();
        let m = DeviceKeyPair::generate().unwrap();
        (
            derive_shared_key(&a, b.public()).unwrap(),
            derive_shared_key(&a, m.public()).unwrap(),
        )
    }

    fn sealed(key: &SharedKey, id: &str, sender: &str, text: &str, secs: i64) -> Message {
        let payload = encrypt(key, text.as_bytes()).unwrap();
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: sender.into(),
            ciphertext: payload.ciphertext,
            nonce: payload.nonce,
            kind: MessageKind::Text,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
                + Duration::seconds(secs),
        }
    }

    #[test]
    fn sorts_and_marks_direction() {
        let (key, _) = key_pair();
        let mut r = TranscriptRenderer::new("alice");
        let out = r.render(
            &key,
            vec![
                sealed(&key, "m2", "bob", "second", 2),
                sealed(&key, "m1", "alice", "first", 1),
            ],
        );
        let texts: Vec<_> = out.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, ["first", "second"]);
        assert!(out[0].outgoing);
        assert!(!out[1].outgoing);
    }

    #[test]
    fn undecryptable_messages_are_omitted() {
        let (key, wrong) = key_pair();
        let mut r = TranscriptRenderer::new("alice");
        let mut tampered = sealed(&key, "m3", "bob", "flipped", 3);
        tampered.ciphertext = sealed(&key, "x", "bob", "other", 0).ciphertext;

        let out = r.render(
            &key,
            vec![
                sealed(&key, "m1", "bob", "ok", 1),
                sealed(&wrong, "m2", "bob", "wrong key", 2),
                tampered,
            ],
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message_id, "m1");
    }

    #[test]
    fn rerender_uses_cache_and_picks_up_changed_payloads() {
        let (key, _) = key_pair();
        let mut r = TranscriptRenderer::new("alice");
        let original = sealed(&key, "m1", "bob", "hello", 1);
        assert_eq!(r.render(&key, vec![original.clone()])[0].text, "hello");
        assert_eq!(r.render(&key, vec![original.clone()])[0].text, "hello");

        let mut corrupted = original;
        corrupted.nonce = sealed(&key, "x", "bob", "x", 0).nonce;
        assert!(r.render(&key, vec![corrupted]).is_empty());
    }
}
