//! External store contracts.
//!
//! Any backend providing these operations works: a realtime document
//! database, a REST endpoint polled through `PollingStore`, or the in-memory
//! double. No wire protocol is implied.

use async_trait::async_trait;

use sx_proto::{BookingRecord, Conversation, ConversationPatch, Message, NewMessage};

use crate::{error::StoreError, subscription::Subscription};

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Return the conversation between `user_a` and `user_b` (either order),
    /// creating it if none exists. `service_ref` is only used on creation.
    async fn find_or_create_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        service_ref: Option<&str>,
    ) -> Result<Conversation, StoreError>;

    async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, StoreError>;

    /// Merge-write top-level fields; nested objects merge key by key, so a
    /// patch touching `typing.alice` leaves `typing.bob` alone.
    async fn merge_write(
        &self,
        conversation_id: &str,
        patch: &ConversationPatch,
    ) -> Result<(), StoreError>;

    /// Append a message; the store assigns `id` and `createdAt`.
    async fn append_message(&self, message: NewMessage) -> Result<Message, StoreError>;

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Snapshots of the conversation's full message list.
    async fn subscribe_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Subscription<Vec<Message>>, StoreError>;

    /// Snapshots of the conversation document (keys, typing, last seen).
    async fn subscribe_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Subscription<Conversation>, StoreError>;

    /// Every conversation `user_id` participates in.
    async fn conversations_for(&self, user_id: &str) -> Result<Vec<Conversation>, StoreError>;
}

/// Read side of the marketplace booking ledger.
#[async_trait]
pub trait BookingFeed: Send + Sync {
    /// Bookings where `user_id` is the provider.
    async fn bookings_for(&self, user_id: &str) -> Result<Vec<BookingRecord>, StoreError>;
}
