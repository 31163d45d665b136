//! Poll-based store adapter.
//!
//! Wraps any `ChatStore` and serves both subscriptions by re-reading the
//! inner store on a fixed interval, emitting only changed snapshots. This is
//! how a backend without push support (plain REST) plugs in; session code
//! cannot tell the difference.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use sx_proto::{Conversation, ConversationPatch, Message, NewMessage};

use crate::{error::StoreError, store::ChatStore, subscription::Subscription};

pub struct PollingStore<S: ?Sized> {
    inner: Arc<S>,
    every: Duration,
}

impl<S: ChatStore + ?Sized + 'static> PollingStore<S> {
    pub fn new(inner: Arc<S>, every: Duration) -> Self {
        Self { inner, every }
    }
}

#[async_trait]
impl<S: ChatStore + ?Sized + 'static> ChatStore for PollingStore<S> {
    async fn find_or_create_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        service_ref: Option<&str>,
    ) -> Result<Conversation, StoreError> {
        self.inner
            .find_or_create_conversation(user_a, user_b, service_ref)
            .await
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, StoreError> {
        self.inner.get_conversation(conversation_id).await
    }

    async fn merge_write(
        &self,
        conversation_id: &str,
        patch: &ConversationPatch,
    ) -> Result<(), StoreError> {
        self.inner.merge_write(conversation_id, patch).await
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.inner.append_message(message).await
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        self.inner.list_messages(conversation_id).await
    }

    async fn subscribe_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Subscription<Vec<Message>>, StoreError> {
        // Fail fast on unknown conversations instead of polling errors forever.
        self.inner.get_conversation(conversation_id).await?;
        let inner = Arc::clone(&self.inner);
        let id = conversation_id.to_string();
        Ok(Subscription::polling(self.every, move || {
            let inner = Arc::clone(&inner);
            let id = id.clone();
            async move { inner.list_messages(&id).await }
        }))
    }

    async fn subscribe_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Subscription<Conversation>, StoreError> {
        self.inner.get_conversation(conversation_id).await?;
        let inner = Arc::clone(&self.inner);
        let id = conversation_id.to_string();
        Ok(Subscription::polling(self.every, move || {
            let inner = Arc::clone(&inner);
            let id = id.clone();
            async move { inner.get_conversation(&id).await }
        }))
    }

    async fn conversations_for(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        self.inner.conversations_for(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::TokioClock, memory::InMemoryStore};

    #[tokio::test(start_paused = true)]
    async fn polled_message_stream_sees_appends() {
        let inner = Arc::new(InMemoryStore::new(Arc::new(TokioClock::new())));
        let store = PollingStore::new(inner.clone(), Duration::from_millis(250));
        let c = store
            .find_or_create_conversation("alice", "bob", None)
            .await
            .unwrap();

        let mut sub = store.subscribe_messages(&c.id).await.unwrap();
        assert!(sub.next().await.unwrap().unwrap().is_empty());

        inner
            .append_message(NewMessage::text(&c.id, "alice", "ct", "n"))
            .await
            .unwrap();
        let snapshot = sub.next().await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn unknown_conversation_fails_fast() {
        let inner = Arc::new(InMemoryStore::new(Arc::new(TokioClock::new())));
        let store = PollingStore::new(inner, Duration::from_millis(250));
        assert!(matches!(
            store.subscribe_messages("nope").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
