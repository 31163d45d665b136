//! Public-key exchange through the conversation document.
//!
//! Each participant writes only its own `publicKeys` slot. An entry, once
//! written, is never replaced: if the device's key no longer matches what
//! the conversation holds, the caller gets `PublicKeyConflict` and decides
//! what to do, the same way a changed identity key blocks messaging until
//! it is verified. After a deliberate key regeneration the caller can ask for
//! `KeyConflictPolicy::ReplaceOwn`, which rewrites only its own slot. History
//! sealed under the old key stops decrypting; the conversation carries on.

use std::{collections::BTreeMap, sync::Arc};

use tracing::{debug, warn};

use sx_crypto::{import_public_key, DeviceKeyPair, PublicKey, SharedKey};
use sx_proto::ConversationPatch;
use sx_store::ChatStore;

use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    AlreadyPublished,
    /// An older entry of ours was overwritten.
    Replaced,
}

/// What to do when this device's key differs from the one the conversation
/// already holds for the same user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyConflictPolicy {
    /// Refuse with `PublicKeyConflict`.
    #[default]
    Reject,
    /// Overwrite our own entry with the device's current key.
    ReplaceOwn,
}

#[derive(Clone)]
pub struct KeyExchangeCoordinator {
    store: Arc<dyn ChatStore>,
}

impl KeyExchangeCoordinator {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub async fn publish_public_key(
        &self,
        conversation_id: &str,
        user_id: &str,
        public_key: &PublicKey,
    ) -> Result<PublishOutcome> {
        let conversation = self.store.get_conversation(conversation_id).await?;
        if !conversation.is_participant(user_id) {
            return Err(ChatError::NotParticipant {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        let encoded = public_key.to_b64();
        match conversation.public_keys.get(user_id) {
            Some(existing) if *existing == encoded => Ok(PublishOutcome::AlreadyPublished),
            Some(_) => {
                warn!(
                    conversation_id,
                    user_id, "published public key differs from device key"
                );
                Err(ChatError::PublicKeyConflict {
                    conversation_id: conversation_id.to_string(),
                    user_id: user_id.to_string(),
                })
            }
            None => {
                let patch = ConversationPatch::new().public_key(user_id, &encoded);
                self.store.merge_write(conversation_id, &patch).await?;
                debug!(
                    conversation_id,
                    user_id,
                    fingerprint = %public_key.fingerprint(),
                    "public key published"
                );
                Ok(PublishOutcome::Published)
            }
        }
    }

    /// Publish, and on a conflict follow `policy`.
    pub async fn publish_with_policy(
        &self,
        conversation_id: &str,
        user_id: &str,
        public_key: &PublicKey,
        policy: KeyConflictPolicy,
    ) -> Result<PublishOutcome> {
        match self.publish_public_key(conversation_id, user_id, public_key).await {
            Err(ChatError::PublicKeyConflict { .. }) if policy == KeyConflictPolicy::ReplaceOwn => {
                self.replace_own_public_key(conversation_id, user_id, public_key)
                    .await?;
                Ok(PublishOutcome::Replaced)
            }
            other => other,
        }
    }

    /// Overwrite `user_id`'s own `publicKeys` entry. Only that slot is
    /// written; the peer's entry is left alone.
    pub async fn replace_own_public_key(
        &self,
        conversation_id: &str,
        user_id: &str,
        public_key: &PublicKey,
    ) -> Result<()> {
        let conversation = self.store.get_conversation(conversation_id).await?;
        if !conversation.is_participant(user_id) {
            return Err(ChatError::NotParticipant {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        let encoded = public_key.to_b64();
        let previous = conversation.public_keys.get(user_id);
        if previous == Some(&encoded) {
            return Ok(());
        }
        let previous = previous.map(|raw| match import_public_key(raw) {
            Ok(key) => key.fingerprint(),
            Err(_) => "<unreadable>".to_string(),
        });

        let patch = ConversationPatch::new().public_key(user_id, &encoded);
        self.store.merge_write(conversation_id, &patch).await?;
        warn!(
            conversation_id,
            user_id,
            previous_fingerprint = previous.as_deref().unwrap_or("<none>"),
            fingerprint = %public_key.fingerprint(),
            "replaced own published public key; earlier messages will not decrypt"
        );
        Ok(())
    }

    /// Raw `publicKeys` map: user id to base64 key.
    pub async fn fetch_public_keys(
        &self,
        conversation_id: &str,
    ) -> Result<BTreeMap<String, String>> {
        Ok(self.store.get_conversation(conversation_id).await?.public_keys)
    }

    /// The peer's key if published. An entry that does not decode is
    /// treated as absent and logged.
    pub async fn peer_public_key(
        &self,
        conversation_id: &str,
        peer_id: &str,
    ) -> Result<Option<PublicKey>> {
        let keys = self.fetch_public_keys(conversation_id).await?;
        Ok(keys.get(peer_id).and_then(|raw| match import_public_key(raw) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(conversation_id, peer_id, error = %e, "peer public key unusable");
                None
            }
        }))
    }

    pub fn derive_shared_key(
        &self,
        device: &DeviceKeyPair,
        peer_public: &PublicKey,
    ) -> Result<SharedKey> {
        Ok(sx_crypto::derive_shared_key(device, peer_public)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sx_store::{InMemoryStore, TokioClock};

    async fn setup() -> (KeyExchangeCoordinator, Arc<InMemoryStore>, String) {
        let store = Arc::new(InMemoryStore::new(Arc::new(TokioClock::new())));
        let c = store
            .find_or_create_conversation("alice", "bob", None)
            .await
            .unwrap();
        (KeyExchangeCoordinator::new(store.clone()), store, c.id)
    }

    #[tokio::test]
    async fn publish_is_idempotent() {
        let (kx, _, conv) = setup().await;
        let pair = DeviceKeyPair::generate().unwrap();
        assert_eq!(
            kx.publish_public_key(&conv, "alice", pair.public()).await.unwrap(),
            PublishOutcome::Published
        );
        assert_eq!(
            kx.publish_public_key(&conv, "alice", pair.public()).await.unwrap(),
            PublishOutcome::AlreadyPublished
        );
        let keys = kx.fetch_public_keys(&conv).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys["alice"], pair.public().to_b64());
    }

    #[tokio::test]
    async fn never_overwrites_a_published_key() {
        let (kx, _, conv) = setup().await;
        let first = DeviceKeyPair::generate().unwrap();
        let second = DeviceKeyPair::generate().unwrap();
        kx.publish_public_key(&conv, "alice", first.public()).await.unwrap();

        let err = kx
            .publish_public_key(&conv, "alice", second.public())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::PublicKeyConflict { .. }));
        assert_eq!(
            kx.fetch_public_keys(&conv).await.unwrap()["alice"],
            first.public().to_b64()
        );
    }

    #[tokio::test]
    async fn replace_own_rewrites_only_our_slot() {
        let (kx, _, conv) = setup().await;
        let old = DeviceKeyPair::generate().unwrap();
        let fresh = DeviceKeyPair::generate().unwrap();
        let bob = DeviceKeyPair::generate().unwrap();
        kx.publish_public_key(&conv, "alice", old.public()).await.unwrap();
        kx.publish_public_key(&conv, "bob", bob.public()).await.unwrap();

        assert!(matches!(
            kx.publish_with_policy(&conv, "alice", fresh.public(), KeyConflictPolicy::Reject)
                .await,
            Err(ChatError::PublicKeyConflict { .. })
        ));
        assert_eq!(
            kx.publish_with_policy(&conv, "alice", fresh.public(), KeyConflictPolicy::ReplaceOwn)
                .await
                .unwrap(),
            PublishOutcome::Replaced
        );
        assert_eq!(
            kx.publish_with_policy(&conv, "alice", fresh.public(), KeyConflictPolicy::ReplaceOwn)
                .await
                .unwrap(),
            PublishOutcome::AlreadyPublished
        );

        let keys = kx.fetch_public_keys(&conv).await.unwrap();
        assert_eq!(keys["alice"], fresh.public().to_b64());
        assert_eq!(keys["bob"], bob.public().to_b64());

        let err = kx
            .replace_own_public_key(&conv, "mallory", fresh.public())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotParticipant { .. }));
    }

    #[tokio::test]
    async fn outsiders_cannot_publish() {
        let (kx, _, conv) = setup().await;
        let pair = DeviceKeyPair::generate().unwrap();
        let err = kx
            .publish_public_key(&conv, "mallory", pair.public())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotParticipant { .. }));
    }

    #[tokio::test]
    async fn both_sides_derive_the_same_key() {
        let (kx, _, conv) = setup().await;
        let alice = DeviceKeyPair::generate().unwrap();
        let bob = DeviceKeyPair::generate().unwrap();
        kx.publish_public_key(&conv, "alice", alice.public()).await.unwrap();
        assert!(kx.peer_public_key(&conv, "alice").await.unwrap().is_some());
        assert!(kx.peer_public_key(&conv, "bob").await.unwrap().is_none());
        kx.publish_public_key(&conv, "bob", bob.public()).await.unwrap();

        let bob_pub = kx.peer_public_key(&conv, "bob").await.unwrap().unwrap();
        let alice_pub = kx.peer_public_key(&conv, "alice").await.unwrap().unwrap();
        let k_a = kx.derive_shared_key(&alice, &bob_pub).unwrap();
        let k_b = kx.derive_shared_key(&bob, &alice_pub).unwrap();
        assert!(k_a.ct_eq(&k_b));
    }

    #[tokio::test]
    async fn garbage_peer_entry_reads_as_absent() {
        let (kx, store, conv) = setup().await;
        store
            .merge_write(&conv, &ConversationPatch::new().public_key("bob", "short"))
            .await
            .unwrap();
        assert!(kx.peer_public_key(&conv, "bob").await.unwrap().is_none());
    }
}
