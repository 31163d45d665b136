//! Per-device chat context.
//!
//! Holds what every session on this device shares: the store handle, the
//! device key store, the exchange coordinator, the presence tracker, the
//! clock and the loaded configuration. Cheap to clone. Sessions are created
//! from here and own everything else themselves.
use std::sync::Arc;

use sx_proto::Conversation;
use sx_store::{BookingFeed, ChatStore, SharedClock};

use crate::{
    config::ChatConfig,
    error::Result,
    exchange::{KeyConflictPolicy, KeyExchangeCoordinator},
    inbox::{self, InboxEntry},
    keystore::KeyStore,
    notify::{BookingEventSource, MessageEventSource, NotificationDispatcher},
    presence::PresenceTracker,
    session::ChatSession,
};

#[derive(Clone)]
pub struct ChatContext {
    store: Arc<dyn ChatStore>,
    keys: Arc<KeyStore>,
    exchange: KeyExchangeCoordinator,
    presence: Arc<PresenceTracker>,
    clock: SharedClock,
    config: Arc<ChatConfig>,
}

impl ChatContext {
    pub fn new(
        store: Arc<dyn ChatStore>,
        keys: Arc<KeyStore>,
        clock: SharedClock,
        config: ChatConfig,
    ) -> Self {
        let exchange = KeyExchangeCoordinator::new(Arc::clone(&store));
        let presence = Arc::new(PresenceTracker::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.timing.clone(),
        ));
        Self {
            store,
            keys,
            exchange,
            presence,
            clock,
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn exchange(&self) -> &KeyExchangeCoordinator {
        &self.exchange
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Find or create the conversation between `me` and `peer`.
    pub async fn open_conversation(
        &self,
        me: &str,
        peer: &str,
        service_ref: Option<&str>,
    ) -> Result<Conversation> {
        inbox::open_conversation(self.store.as_ref(), me, peer, service_ref).await
    }

    /// Dispatcher over this device's store, polling at the configured
    /// notification interval. Bookings are watched when a feed is given.
    pub fn notification_dispatcher(
        &self,
        bookings: Option<Arc<dyn BookingFeed>>,
    ) -> NotificationDispatcher {
        let dispatcher = NotificationDispatcher::new(self.config.timing.notification_poll_interval())
            .with_source(Arc::new(MessageEventSource::new(Arc::clone(&self.store))));
        match bookings {
            Some(feed) => dispatcher.with_source(Arc::new(BookingEventSource::new(feed))),
            None => dispatcher,
        }
    }

    pub async fn inbox(&self, user_id: &str) -> Result<Vec<InboxEntry>> {
        inbox::build_inbox(self.store.as_ref(), user_id).await
    }

    /// Open a session on `conversation_id` as `user_id`. See `ChatSession::open`.
    pub async fn open_session(&self, conversation_id: &str, user_id: &str) -> Result<ChatSession> {
        ChatSession::open(self.clone(), conversation_id, user_id).await
    }

    /// Open a session, taking over our own published key slot if it holds a
    /// key this device no longer has. Use after a key regeneration.
    pub async fn open_session_replacing_key(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<ChatSession> {
        ChatSession::open_with(
            self.clone(),
            conversation_id,
            user_id,
            KeyConflictPolicy::ReplaceOwn,
        )
        .await
    }
}
