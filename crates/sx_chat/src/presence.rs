//! Typing indicators, last-seen marks and unread counts.
//!
//! Presence lives in the conversation document (`typing`, `lastSeen`) and
//! works whether or not the key exchange has finished.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tracing::debug;

use sx_proto::{Conversation, ConversationPatch, Message, Timestamp};
use sx_store::{ChatStore, SharedClock};

use crate::{config::TimingConfig, error::Result};

/// What a participant can see of the other one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPresence {
    pub peer_id: String,
    pub last_typing_at: Option<Timestamp>,
    pub last_seen: Option<Timestamp>,
}

impl PeerPresence {
    pub fn from_conversation(conversation: &Conversation, peer_id: &str) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            last_typing_at: conversation.typing.get(peer_id).copied(),
            last_seen: conversation.last_seen.get(peer_id).copied(),
        }
    }

    pub fn is_typing(&self, now: Timestamp, window: Duration) -> bool {
        typing_is_fresh(self.last_typing_at, now, window)
    }
}

/// True while a typing ping is younger than `window`. A ping stamped in the
/// future (peer clock ahead) counts as fresh only within the same window.
pub fn typing_is_fresh(last_typing_at: Option<Timestamp>, now: Timestamp, window: Duration) -> bool {
    let Some(at) = last_typing_at else {
        return false;
    };
    match (now - at).to_std() {
        Ok(age) => age < window,
        Err(_) => (at - now).to_std().map_or(false, |ahead| ahead < window),
    }
}

/// Peer-authored messages newer than `last_seen`; every peer message if the
/// viewer has never opened the conversation.
pub fn count_unread(messages: &[Message], viewer_id: &str, last_seen: Option<Timestamp>) -> usize {
    messages
        .iter()
        .filter(|m| m.sender_id != viewer_id)
        .filter(|m| last_seen.map_or(true, |seen| m.created_at > seen))
        .count()
}

pub struct PresenceTracker {
    store: Arc<dyn ChatStore>,
    clock: SharedClock,
    timing: TimingConfig,
    last_typing_write: Mutex<HashMap<(String, String), Timestamp>>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn ChatStore>, clock: SharedClock, timing: TimingConfig) -> Self {
        Self {
            store,
            clock,
            timing,
            last_typing_write: Mutex::new(HashMap::new()),
        }
    }

    /// Ping `typing[user_id] = now`, at most once per throttle interval per
    /// conversation and user. Returns whether a write went out.
    pub async fn set_typing(&self, conversation_id: &str, user_id: &str) -> Result<bool> {
        let now = self.clock.now();
        let slot = (conversation_id.to_string(), user_id.to_string());
        {
            let mut writes = self.last_typing_write.lock();
            if let Some(last) = writes.get(&slot) {
                let elapsed = (now - *last).to_std().unwrap_or(Duration::ZERO);
                if elapsed < self.timing.typing_throttle() {
                    return Ok(false);
                }
            }
            writes.insert(slot.clone(), now);
        }

        let patch = ConversationPatch::new().typing(user_id, now);
        if let Err(e) = self.store.merge_write(conversation_id, &patch).await {
            let mut writes = self.last_typing_write.lock();
            if writes.get(&slot) == Some(&now) {
                writes.remove(&slot);
            }
            return Err(e.into());
        }
        Ok(true)
    }

    pub async fn is_peer_typing(&self, conversation_id: &str, peer_id: &str) -> Result<bool> {
        let conversation = self.store.get_conversation(conversation_id).await?;
        Ok(typing_is_fresh(
            conversation.typing.get(peer_id).copied(),
            self.clock.now(),
            self.timing.typing_window(),
        ))
    }

    pub async fn set_last_seen(&self, conversation_id: &str, user_id: &str) -> Result<Timestamp> {
        let now = self.clock.now();
        let patch = ConversationPatch::new().last_seen(user_id, now);
        self.store.merge_write(conversation_id, &patch).await?;
        debug!(conversation_id, user_id, "last seen updated");
        Ok(now)
    }

    pub async fn unread_count(&self, conversation_id: &str, viewer_id: &str) -> Result<usize> {
        let conversation = self.store.get_conversation(conversation_id).await?;
        let messages = self.store.list_messages(conversation_id).await?;
        Ok(count_unread(
            &messages,
            viewer_id,
            conversation.last_seen.get(viewer_id).copied(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sx_proto::NewMessage;
    use sx_store::{InMemoryStore, ManualClock};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    async fn setup() -> (PresenceTracker, Arc<InMemoryStore>, Arc<ManualClock>, String) {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let c = store
            .find_or_create_conversation("alice", "bob", None)
            .await
            .unwrap();
        let tracker = PresenceTracker::new(store.clone(), clock.clone(), TimingConfig::default());
        (tracker, store, clock, c.id)
    }

    #[test]
    fn typing_freshness_window() {
        let window = Duration::from_secs(4);
        let now = t0();
        assert!(!typing_is_fresh(None, now, window));
        assert!(typing_is_fresh(Some(now - chrono::Duration::seconds(3)), now, window));
        assert!(!typing_is_fresh(Some(now - chrono::Duration::seconds(4)), now, window));
        assert!(!typing_is_fresh(Some(now - chrono::Duration::seconds(30)), now, window));
        assert!(typing_is_fresh(Some(now + chrono::Duration::seconds(1)), now, window));
        assert!(!typing_is_fresh(Some(now + chrono::Duration::minutes(5)), now, window));
    }

    #[tokio::test]
    async fn typing_writes_are_throttled() {
        let (tracker, _, clock, conv) = setup().await;
        assert!(tracker.set_typing(&conv, "alice").await.unwrap());
        clock.advance(Duration::from_millis(500));
        assert!(!tracker.set_typing(&conv, "alice").await.unwrap());
        // Throttling is per user.
        assert!(tracker.set_typing(&conv, "bob").await.unwrap());
        clock.advance(Duration::from_millis(1_000));
        assert!(tracker.set_typing(&conv, "alice").await.unwrap());
    }

    #[tokio::test]
    async fn peer_typing_expires() {
        let (tracker, _, clock, conv) = setup().await;
        tracker.set_typing(&conv, "bob").await.unwrap();
        assert!(tracker.is_peer_typing(&conv, "bob").await.unwrap());
        assert!(!tracker.is_peer_typing(&conv, "alice").await.unwrap());
        clock.advance(Duration::from_secs(5));
        assert!(!tracker.is_peer_typing(&conv, "bob").await.unwrap());
    }

    #[tokio::test]
    async fn failed_typing_write_is_not_throttled() {
        let (tracker, store, _, conv) = setup().await;
        store.set_reject_writes(true);
        assert!(tracker.set_typing(&conv, "alice").await.is_err());
        store.set_reject_writes(false);
        assert!(tracker.set_typing(&conv, "alice").await.unwrap());
    }

    #[tokio::test]
    async fn unread_counts_only_peer_messages_after_last_seen() {
        let (tracker, store, clock, conv) = setup().await;
        for sender in ["bob", "bob", "alice"] {
            store
                .append_message(NewMessage::text(&conv, sender, "ct", "n"))
                .await
                .unwrap();
            clock.advance(Duration::from_secs(1));
        }
        // Never opened: every peer message is unread.
        assert_eq!(tracker.unread_count(&conv, "alice").await.unwrap(), 2);
        assert_eq!(tracker.unread_count(&conv, "bob").await.unwrap(), 1);

        tracker.set_last_seen(&conv, "alice").await.unwrap();
        assert_eq!(tracker.unread_count(&conv, "alice").await.unwrap(), 0);

        clock.advance(Duration::from_secs(1));
        store
            .append_message(NewMessage::text(&conv, "bob", "ct", "n"))
            .await
            .unwrap();
        assert_eq!(tracker.unread_count(&conv, "alice").await.unwrap(), 1);
    }

    #[test]
    fn unread_ignores_messages_at_exactly_last_seen() {
        let at = t0();
        let msg = Message {
            id: "m1".into(),
            conversation_id: "c".into(),
            sender_id: "bob".into(),
            ciphertext: "ct".into(),
            nonce: "n".into(),
            kind: Default::default(),
            created_at: at,
        };
        assert_eq!(count_unread(&[msg.clone()], "alice", Some(at)), 0);
        assert_eq!(count_unread(&[msg], "alice", None), 1);
    }
}
