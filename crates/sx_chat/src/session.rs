//! One open conversation on this device.
//!
//! A `ChatSession` drives the key handshake for its conversation and then
//! carries messages in both directions:
//!
//! ```text
//! Init ──peer key present──▶ KeyReady ──close──▶ Closed
//!   │                           ▲
//!   └──▶ AwaitingPeerKey ───────┘ (poll finds the key)
//! ```
//!
//! Sends made before `KeyReady` wait in a bounded in-memory queue. The queue
//! flush and every later send go through one async lock (the send lane), so
//! queued messages leave first, in order, and each leaves exactly once.
//!
//! Each session owns its stop flag, queue and task handles. Dropping or
//! closing the session stops the key poller and both listeners.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use serde::Serialize;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use sx_crypto::{encrypt, DeviceKeyPair, PublicKey, SharedKey};
use sx_proto::{Message, NewMessage};

use crate::{
    context::ChatContext,
    error::{ChatError, Result},
    exchange::KeyConflictPolicy,
    presence::PeerPresence,
    render::{TranscriptEntry, TranscriptRenderer},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    AwaitingPeerKey,
    KeyReady,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Encrypted and accepted by the store.
    Sent(Message),
    /// Waiting for the shared key; `position` is 1-based.
    Queued { position: usize },
}

struct Lane {
    key: Option<Arc<SharedKey>>,
    pending: VecDeque<Zeroizing<String>>,
}

#[derive(Default)]
struct Tasks {
    key_poller: Option<JoinHandle<()>>,
    messages: Option<JoinHandle<()>>,
    presence: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        for handle in [
            self.key_poller.take(),
            self.messages.take(),
            self.presence.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

struct Shared {
    conversation_id: String,
    user_id: String,
    peer_id: String,
    ctx: ChatContext,
    device: Arc<DeviceKeyPair>,
    state_tx: watch::Sender<SessionState>,
    lane: Mutex<Lane>,
    transcript_tx: watch::Sender<Vec<TranscriptEntry>>,
    presence_tx: watch::Sender<PeerPresence>,
    closed: AtomicBool,
    tasks: parking_lot::Mutex<Tasks>,
}

pub struct ChatSession {
    shared: Arc<Shared>,
}

impl ChatSession {
    /// Open `conversation_id` as `user_id`.
    ///
    /// Loads (or creates) the device key, publishes its public half, marks
    /// the conversation seen and checks once for the peer's key. If the
    /// peer key is there the session comes back `KeyReady`; otherwise it is
    /// `AwaitingPeerKey` with a bounded poll running in the background.
    ///
    /// A device key that differs from the one already published for
    /// `user_id` fails with `PublicKeyConflict`; see `open_with`.
    pub async fn open(ctx: ChatContext, conversation_id: &str, user_id: &str) -> Result<Self> {
        Self::open_with(ctx, conversation_id, user_id, KeyConflictPolicy::Reject).await
    }

    /// `open`, choosing what happens when the published key for `user_id`
    /// no longer matches this device's key.
    pub async fn open_with(
        ctx: ChatContext,
        conversation_id: &str,
        user_id: &str,
        on_conflict: KeyConflictPolicy,
    ) -> Result<Self> {
        let conversation = ctx.store().get_conversation(conversation_id).await?;
        let peer_id = conversation
            .peer_of(user_id)
            .ok_or_else(|| ChatError::NotParticipant {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
            })?
            .to_string();

        let device = ctx.keys().get_or_create_key_pair().await?;
        ctx.exchange()
            .publish_with_policy(conversation_id, user_id, device.public(), on_conflict)
            .await?;
        if let Err(e) = ctx.presence().set_last_seen(conversation_id, user_id).await {
            warn!(conversation_id, error = %e, "could not mark conversation seen on open");
        }

        let (state_tx, _) = watch::channel(SessionState::Init);
        let (transcript_tx, _) = watch::channel(Vec::new());
        let (presence_tx, _) =
            watch::channel(PeerPresence::from_conversation(&conversation, &peer_id));

        let shared = Arc::new(Shared {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            peer_id,
            ctx,
            device,
            state_tx,
            lane: Mutex::new(Lane {
                key: None,
                pending: VecDeque::new(),
            }),
            transcript_tx,
            presence_tx,
            closed: AtomicBool::new(false),
            tasks: parking_lot::Mutex::new(Tasks::default()),
        });

        // From here on, dropping `session` on an error path stops its tasks.
        let session = Self { shared };
        let shared = &session.shared;
        shared.start_presence_listener().await;

        let peer_key = match shared
            .ctx
            .exchange()
            .peer_public_key(conversation_id, &shared.peer_id)
            .await
        {
            Ok(key) => key,
            Err(e) => {
                warn!(conversation_id, error = %e, "initial peer key fetch failed");
                None
            }
        };
        match peer_key {
            Some(peer) => shared.become_ready(peer).await?,
            None => {
                shared.state_tx.send_replace(SessionState::AwaitingPeerKey);
                debug!(conversation_id, peer_id = %shared.peer_id, "awaiting peer key");
                shared.spawn_key_poller();
            }
        }

        Ok(session)
    }

    pub fn conversation_id(&self) -> &str {
        &self.shared.conversation_id
    }

    pub fn user_id(&self) -> &str {
        &self.shared.user_id
    }

    pub fn peer_id(&self) -> &str {
        &self.shared.peer_id
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Encrypt and send `text`, or queue it until the shared key exists.
    ///
    /// A store failure on an immediate send hands the error back and keeps
    /// nothing; the caller still owns the message.
    pub async fn send(&self, text: impl Into<String>) -> Result<SendOutcome> {
        let shared = &self.shared;
        shared.ensure_open()?;
        let text = Zeroizing::new(text.into());

        let mut lane = shared.lane.lock().await;
        shared.ensure_open()?;
        match lane.key.clone() {
            Some(key) => {
                // A backlog left by a failed flush goes out first.
                shared.flush_locked(&mut lane, &key).await?;
                let message = shared.seal_and_append(&key, &text).await?;
                Ok(SendOutcome::Sent(message))
            }
            None => {
                let capacity = shared.ctx.config().limits.pending_queue_capacity;
                if lane.pending.len() >= capacity {
                    return Err(ChatError::QueueFull {
                        conversation_id: shared.conversation_id.clone(),
                        capacity,
                    });
                }
                lane.pending.push_back(text);
                let position = lane.pending.len();
                debug!(conversation_id = %shared.conversation_id, position, "message queued");
                Ok(SendOutcome::Queued { position })
            }
        }
    }

    /// Flush whatever is still queued. Returns how many messages went out;
    /// zero while the key is not ready.
    pub async fn retry_pending(&self) -> Result<usize> {
        let shared = &self.shared;
        shared.ensure_open()?;
        let mut lane = shared.lane.lock().await;
        let Some(key) = lane.key.clone() else {
            return Ok(0);
        };
        shared.flush_locked(&mut lane, &key).await
    }

    /// Start a fresh bounded key poll. No-op once the key is ready.
    pub fn repoll(&self) -> Result<()> {
        self.shared.ensure_open()?;
        if self.state() == SessionState::KeyReady {
            return Ok(());
        }
        info!(conversation_id = %self.shared.conversation_id, "restarting peer key poll");
        self.shared.spawn_key_poller();
        Ok(())
    }

    pub async fn pending_len(&self) -> usize {
        self.shared.lane.lock().await.pending.len()
    }

    /// Decrypted transcript, oldest first. Empty until the key is ready.
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.shared.transcript_tx.borrow().clone()
    }

    pub fn watch_transcript(&self) -> watch::Receiver<Vec<TranscriptEntry>> {
        self.shared.transcript_tx.subscribe()
    }

    pub fn peer_presence(&self) -> PeerPresence {
        self.shared.presence_tx.borrow().clone()
    }

    pub fn watch_presence(&self) -> watch::Receiver<PeerPresence> {
        self.shared.presence_tx.subscribe()
    }

    /// From the latest presence snapshot; expires on its own.
    pub fn is_peer_typing(&self) -> bool {
        let ctx = &self.shared.ctx;
        self.shared
            .presence_tx
            .borrow()
            .is_typing(ctx.clock().now(), ctx.config().timing.typing_window())
    }

    /// Throttled typing ping for the local user.
    pub async fn notify_typing(&self) -> Result<bool> {
        self.shared.ensure_open()?;
        self.shared
            .ctx
            .presence()
            .set_typing(&self.shared.conversation_id, &self.shared.user_id)
            .await
    }

    pub async fn close(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.tasks.lock().abort_all();

        {
            let mut lane = shared.lane.lock().await;
            if !lane.pending.is_empty() {
                warn!(
                    conversation_id = %shared.conversation_id,
                    dropped = lane.pending.len(),
                    "session closed with unsent messages"
                );
            }
            lane.pending.clear();
            lane.key = None;
        }
        shared.state_tx.send_replace(SessionState::Closed);

        if let Err(e) = shared
            .ctx
            .presence()
            .set_last_seen(&shared.conversation_id, &shared.user_id)
            .await
        {
            warn!(conversation_id = %shared.conversation_id, error = %e, "could not mark conversation seen on close");
        }
        debug!(conversation_id = %shared.conversation_id, "session closed");
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.tasks.lock().abort_all();
    }
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ChatError::SessionClosed(self.conversation_id.clone()));
        }
        Ok(())
    }

    async fn seal_and_append(&self, key: &SharedKey, text: &str) -> Result<Message> {
        let sealed = encrypt(key, text.as_bytes())?;
        let message = self
            .ctx
            .store()
            .append_message(NewMessage::text(
                &self.conversation_id,
                &self.user_id,
                sealed.ciphertext,
                sealed.nonce,
            ))
            .await?;
        Ok(message)
    }

    /// Send queued messages in order. Stops at the first failure and leaves
    /// that message at the head of the queue.
    async fn flush_locked(&self, lane: &mut Lane, key: &SharedKey) -> Result<usize> {
        let mut sent = 0;
        while let Some(text) = lane.pending.front() {
            if let Err(e) = self.seal_and_append(key, text).await {
                warn!(
                    conversation_id = %self.conversation_id,
                    remaining = lane.pending.len(),
                    error = %e,
                    "flush of queued messages interrupted"
                );
                return Err(e);
            }
            lane.pending.pop_front();
            sent += 1;
        }
        if sent > 0 {
            info!(conversation_id = %self.conversation_id, sent, "queued messages flushed");
        }
        Ok(sent)
    }

    /// Derive the shared key (once), flush the queue and start rendering.
    async fn become_ready(self: &Arc<Self>, peer: PublicKey) -> Result<()> {
        let mut lane = self.lane.lock().await;
        if self.is_closed() || lane.key.is_some() {
            return Ok(());
        }
        let key = Arc::new(self.ctx.exchange().derive_shared_key(&self.device, &peer)?);
        lane.key = Some(Arc::clone(&key));
        self.state_tx.send_replace(SessionState::KeyReady);
        info!(
            conversation_id = %self.conversation_id,
            peer_fingerprint = %peer.fingerprint(),
            "shared key ready"
        );

        // Failures are already logged; the backlog stays for retry_pending.
        let _ = self.flush_locked(&mut lane, &key).await;
        drop(lane);

        self.start_message_listener(key).await;
        Ok(())
    }

    fn spawn_key_poller(self: &Arc<Self>) {
        let shared = Arc::clone(self);
        let timing = &self.ctx.config().timing;
        let every = timing.key_poll_interval();
        let timeout = timing.key_exchange_timeout();

        let handle = tokio::spawn(async move {
            let deadline = Instant::now() + timeout;
            loop {
                time::sleep(every).await;
                if shared.is_closed() {
                    return;
                }
                match shared
                    .ctx
                    .exchange()
                    .peer_public_key(&shared.conversation_id, &shared.peer_id)
                    .await
                {
                    Ok(Some(peer)) => {
                        if let Err(e) = shared.become_ready(peer).await {
                            warn!(
                                conversation_id = %shared.conversation_id,
                                error = %e,
                                "peer key unusable; staying in awaiting state"
                            );
                        }
                        return;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(conversation_id = %shared.conversation_id, error = %e, "peer key poll failed");
                    }
                }
                if Instant::now() >= deadline {
                    warn!(
                        conversation_id = %shared.conversation_id,
                        peer_id = %shared.peer_id,
                        "peer key not published before timeout; messages stay queued"
                    );
                    return;
                }
            }
        });

        let mut tasks = self.tasks.lock();
        if let Some(previous) = tasks.key_poller.replace(handle) {
            previous.abort();
        }
        if self.is_closed() {
            tasks.abort_all();
        }
    }

    async fn start_message_listener(self: &Arc<Self>, key: Arc<SharedKey>) {
        let mut subscription = match self.ctx.store().subscribe_messages(&self.conversation_id).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(conversation_id = %self.conversation_id, error = %e, "message subscription failed");
                return;
            }
        };

        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut renderer = TranscriptRenderer::new(shared.user_id.clone());
            while let Some(item) = subscription.next().await {
                match item {
                    Ok(messages) => {
                        let transcript = renderer.render(&key, messages);
                        shared.transcript_tx.send_replace(transcript);
                    }
                    Err(e) => {
                        warn!(conversation_id = %shared.conversation_id, error = %e, "message stream error");
                    }
                }
            }
        });

        let mut tasks = self.tasks.lock();
        if let Some(previous) = tasks.messages.replace(handle) {
            previous.abort();
        }
        if self.is_closed() {
            tasks.abort_all();
        }
    }

    async fn start_presence_listener(self: &Arc<Self>) {
        let mut subscription = match self
            .ctx
            .store()
            .subscribe_conversation(&self.conversation_id)
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                warn!(conversation_id = %self.conversation_id, error = %e, "presence subscription failed");
                return;
            }
        };

        let shared = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(item) = subscription.next().await {
                match item {
                    Ok(conversation) => {
                        let presence = PeerPresence::from_conversation(&conversation, &shared.peer_id);
                        shared.presence_tx.send_if_modified(|current| {
                            if *current == presence {
                                return false;
                            }
                            *current = presence;
                            true
                        });
                    }
                    Err(e) => {
                        warn!(conversation_id = %shared.conversation_id, error = %e, "presence stream error");
                    }
                }
            }
        });

        let mut tasks = self.tasks.lock();
        if let Some(previous) = tasks.presence.replace(handle) {
            previous.abort();
        }
        if self.is_closed() {
            tasks.abort_all();
        }
    }
}
