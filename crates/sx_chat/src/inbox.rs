//! Conversation list for a user.

use serde::Serialize;
use tracing::debug;

use sx_proto::{Conversation, Timestamp};
use sx_store::ChatStore;

use crate::{error::Result, presence::count_unread};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboxEntry {
    pub conversation_id: String,
    pub peer_id: String,
    pub service_ref: Option<String>,
    /// Newest message time, or the conversation's creation time if empty.
    pub last_activity: Timestamp,
    pub unread: usize,
}

pub async fn open_conversation(
    store: &dyn ChatStore,
    me: &str,
    peer: &str,
    service_ref: Option<&str>,
) -> Result<Conversation> {
    let conversation = store.find_or_create_conversation(me, peer, service_ref).await?;
    debug!(conversation_id = %conversation.id, me, peer, "conversation opened");
    Ok(conversation)
}

/// Every conversation of `user_id`, most recently active first.
pub async fn build_inbox(store: &dyn ChatStore, user_id: &str) -> Result<Vec<InboxEntry>> {
    let mut entries = Vec::new();
    for conversation in store.conversations_for(user_id).await? {
        let Some(peer_id) = conversation.peer_of(user_id) else {
            continue;
        };
        let messages = store.list_messages(&conversation.id).await?;
        let last_activity = messages
            .iter()
            .map(|m| m.created_at)
            .max()
            .unwrap_or(conversation.created_at);
        entries.push(InboxEntry {
            conversation_id: conversation.id.clone(),
            peer_id: peer_id.to_string(),
            service_ref: conversation.service_ref.clone(),
            last_activity,
            unread: count_unread(
                &messages,
                user_id,
                conversation.last_seen.get(user_id).copied(),
            ),
        });
    }
    entries.sort_by(|a, b| {
        b.last_activity
            .cmp(&a.last_activity)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
    });
    Ok(entries)
}
