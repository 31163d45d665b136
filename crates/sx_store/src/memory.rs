//! In-memory document store.
//!
//! Implements the full `ChatStore` contract with push subscriptions backed
//! by `watch` channels. Used by the simulator and every test in the
//! workspace; failure switches let tests exercise rejected writes and
//! unavailable reads.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use sx_proto::{merge_json, Conversation, ConversationPatch, Message, NewMessage};

use crate::{
    clock::SharedClock, error::StoreError, store::ChatStore, subscription::Subscription,
};

struct ConversationEntry {
    conversation_tx: watch::Sender<Conversation>,
    messages_tx: watch::Sender<Vec<Message>>,
}

impl ConversationEntry {
    fn new(conversation: Conversation) -> Self {
        let (conversation_tx, _) = watch::channel(conversation);
        let (messages_tx, _) = watch::channel(Vec::new());
        Self {
            conversation_tx,
            messages_tx,
        }
    }

    fn conversation(&self) -> Conversation {
        self.conversation_tx.borrow().clone()
    }
}

pub struct InMemoryStore {
    conversations: Mutex<BTreeMap<String, ConversationEntry>>,
    clock: SharedClock,
    reject_writes: AtomicBool,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            conversations: Mutex::new(BTreeMap::new()),
            clock,
            reject_writes: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Reject every write (merge, append, create) until switched back.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Fail every read and subscribe until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Rewrite a stored message in place, bypassing the append-only rule.
    /// Simulates corruption in transit or at rest; subscribers see it.
    pub fn tamper_message<F>(
        &self,
        conversation_id: &str,
        message_id: &str,
        edit: F,
    ) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Message),
    {
        let guard = self.conversations.lock();
        let entry = guard
            .get(conversation_id)
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
        let mut messages = entry.messages_tx.borrow().clone();
        let message = messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| StoreError::NotFound(message_id.to_string()))?;
        edit(message);
        entry.messages_tx.send_replace(messages);
        Ok(())
    }

    fn check_writable(&self, what: &str) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected(what.to_string()));
        }
        Ok(())
    }

    fn check_readable(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatStore for InMemoryStore {
    async fn find_or_create_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        service_ref: Option<&str>,
    ) -> Result<Conversation, StoreError> {
        self.check_readable()?;
        if user_a.is_empty() || user_b.is_empty() || user_a == user_b {
            return Err(StoreError::InvalidParticipants(format!(
                "a conversation needs two distinct users, got {user_a:?} and {user_b:?}"
            )));
        }

        let mut guard = self.conversations.lock();
        if let Some(existing) = guard
            .values()
            .map(ConversationEntry::conversation)
            .find(|c| c.is_between(user_a, user_b))
        {
            return Ok(existing);
        }

        self.check_writable("create conversation")?;
        let conversation = Conversation::new(
            uuid::Uuid::new_v4().to_string(),
            user_a,
            user_b,
            service_ref.map(str::to_string),
            self.clock.now(),
        );
        debug!(conversation_id = %conversation.id, "conversation created");
        guard.insert(
            conversation.id.clone(),
            ConversationEntry::new(conversation.clone()),
        );
        Ok(conversation)
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, StoreError> {
        self.check_readable()?;
        self.conversations
            .lock()
            .get(conversation_id)
            .map(ConversationEntry::conversation)
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))
    }

    async fn merge_write(
        &self,
        conversation_id: &str,
        patch: &ConversationPatch,
    ) -> Result<(), StoreError> {
        self.check_writable("merge write")?;
        let guard = self.conversations.lock();
        let entry = guard
            .get(conversation_id)
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;

        let current = entry.conversation();
        let mut doc = serde_json::to_value(&current)?;
        merge_json(&mut doc, &patch.as_value());
        let merged: Conversation = serde_json::from_value(doc)
            .map_err(|e| StoreError::InvalidPatch(e.to_string()))?;
        if merged.id != current.id || merged.participants != current.participants {
            return Err(StoreError::InvalidPatch(
                "id and participants are immutable".into(),
            ));
        }
        entry.conversation_tx.send_replace(merged);
        Ok(())
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError> {
        self.check_writable("append message")?;
        let guard = self.conversations.lock();
        let entry = guard
            .get(&message.conversation_id)
            .ok_or_else(|| StoreError::NotFound(message.conversation_id.clone()))?;
        if !entry.conversation().is_participant(&message.sender_id) {
            return Err(StoreError::InvalidParticipants(format!(
                "{} is not part of conversation {}",
                message.sender_id, message.conversation_id
            )));
        }

        let stored = Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            ciphertext: message.ciphertext,
            nonce: message.nonce,
            kind: message.kind,
            created_at: self.clock.now(),
        };
        entry.messages_tx.send_modify(|list| list.push(stored.clone()));
        Ok(stored)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        self.check_readable()?;
        self.conversations
            .lock()
            .get(conversation_id)
            .map(|e| e.messages_tx.borrow().clone())
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))
    }

    async fn subscribe_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Subscription<Vec<Message>>, StoreError> {
        self.check_readable()?;
        let rx = self
            .conversations
            .lock()
            .get(conversation_id)
            .map(|e| e.messages_tx.subscribe())
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
        Ok(Subscription::from_watch(rx))
    }

    async fn subscribe_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Subscription<Conversation>, StoreError> {
        self.check_readable()?;
        let rx = self
            .conversations
            .lock()
            .get(conversation_id)
            .map(|e| e.conversation_tx.subscribe())
            .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))?;
        Ok(Subscription::from_watch(rx))
    }

    async fn conversations_for(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError> {
        self.check_readable()?;
        Ok(self
            .conversations
            .lock()
            .values()
            .map(ConversationEntry::conversation)
            .filter(|c| c.is_participant(user_id))
            .collect())
    }
}
