//! New-event notifications.
//!
//! Each source is polled with the poll-with-diff subscription. The first
//! good snapshot only sets a watermark (the newest timestamp already there)
//! so history is never announced as new. After that, events strictly newer
//! than the watermark are delivered oldest first and the watermark moves up.
//!
//! Store errors are logged and skipped; a failing source just stays quiet.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use sx_proto::{NotificationEvent, Timestamp};
use sx_store::{BookingFeed, ChatStore, StoreError, Subscription};

const DELIVERY_BUFFER: usize = 64;

#[async_trait]
pub trait EventSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Every event currently known for `target_user_id`, in any order.
    async fn snapshot(&self, target_user_id: &str) -> Result<Vec<NotificationEvent>, StoreError>;
}

/// Messages written by someone else in any of the target's conversations.
pub struct MessageEventSource {
    store: Arc<dyn ChatStore>,
}

impl MessageEventSource {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventSource for MessageEventSource {
    fn name(&self) -> &'static str {
        "messages"
    }

    async fn snapshot(&self, target_user_id: &str) -> Result<Vec<NotificationEvent>, StoreError> {
        let mut events = Vec::new();
        for conversation in self.store.conversations_for(target_user_id).await? {
            let messages = self.store.list_messages(&conversation.id).await?;
            events.extend(
                messages
                    .iter()
                    .filter(|m| m.sender_id != target_user_id)
                    .map(|m| NotificationEvent::for_message(target_user_id, m)),
            );
        }
        Ok(events)
    }
}

/// Bookings where the target is the provider.
pub struct BookingEventSource {
    feed: Arc<dyn BookingFeed>,
}

impl BookingEventSource {
    pub fn new(feed: Arc<dyn BookingFeed>) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl EventSource for BookingEventSource {
    fn name(&self) -> &'static str {
        "bookings"
    }

    async fn snapshot(&self, target_user_id: &str) -> Result<Vec<NotificationEvent>, StoreError> {
        Ok(self
            .feed
            .bookings_for(target_user_id)
            .await?
            .iter()
            .map(NotificationEvent::for_booking)
            .collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watermark {
    primed: bool,
    mark: Option<Timestamp>,
}

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) -> Option<Timestamp> {
        self.mark
    }

    /// Feed one snapshot; returns the events that count as new.
    pub fn observe(&mut self, events: Vec<NotificationEvent>) -> Vec<NotificationEvent> {
        if !self.primed {
            self.primed = true;
            self.mark = events.iter().map(|e| e.occurred_at).max();
            return Vec::new();
        }
        let mark = self.mark;
        let mut fresh: Vec<_> = events
            .into_iter()
            .filter(|e| mark.map_or(true, |m| e.occurred_at > m))
            .collect();
        fresh.sort_by_key(|e| e.occurred_at);
        if let Some(newest) = fresh.last() {
            self.mark = Some(newest.occurred_at);
        }
        fresh
    }
}

pub struct NotificationDispatcher {
    sources: Vec<Arc<dyn EventSource>>,
    poll_interval: Duration,
}

impl NotificationDispatcher {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            sources: Vec::new(),
            poll_interval,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Call `on_event` for every new event addressed to `target_user_id`
    /// until the handle is cancelled or dropped.
    pub fn subscribe<F>(&self, target_user_id: &str, mut on_event: F) -> DispatchHandle
    where
        F: FnMut(NotificationEvent) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<NotificationEvent>(DELIVERY_BUFFER);
        let mut tasks = Vec::with_capacity(self.sources.len() + 1);

        for source in &self.sources {
            tasks.push(spawn_source_watch(
                Arc::clone(source),
                target_user_id.to_string(),
                self.poll_interval,
                tx.clone(),
            ));
        }
        drop(tx);

        tasks.push(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                on_event(event);
            }
        }));

        DispatchHandle { tasks }
    }
}

fn spawn_source_watch(
    source: Arc<dyn EventSource>,
    target: String,
    every: Duration,
    tx: mpsc::Sender<NotificationEvent>,
) -> JoinHandle<()> {
    let name = source.name();
    let mut snapshots: Subscription<Vec<NotificationEvent>> = {
        let target = target.clone();
        Subscription::polling(every, move || {
            let source = Arc::clone(&source);
            let target = target.clone();
            async move { source.snapshot(&target).await }
        })
    };

    tokio::spawn(async move {
        let mut watermark = Watermark::new();
        while let Some(item) = snapshots.next().await {
            match item {
                Ok(events) => {
                    for event in watermark.observe(events) {
                        debug!(source = name, target = %target, event_id = %event.id, "new event");
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(source = name, target = %target, error = %e, "notification source failed");
                }
            }
        }
    })
}

/// Stops its subscription when cancelled or dropped.
pub struct DispatchHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl DispatchHandle {
    pub fn cancel(self) {}
}

impl Drop for DispatchHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
