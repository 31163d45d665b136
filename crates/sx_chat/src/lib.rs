//! sx_chat: End-to-end encrypted chat for SkillExchange
//!
//! Two participants per conversation. Each device holds a static X25519
//! key pair; public halves are exchanged through the conversation document
//! and both sides derive the same AES-256-GCM key. The store only ever sees
//! ciphertext.
//!
//! # Modules
//! - `keystore`: device key pair, get-or-create over a `KeyPersistence` backend
//! - `exchange`: publish / fetch public keys, derive the shared key
//! - `session`: per-conversation state machine, pending queue, listeners
//! - `render`: decrypt-once transcript rendering
//! - `presence`: typing pings, last-seen, unread counts
//! - `notify`: watermark-filtered new-event notifications
//! - `inbox`: conversation list with unread counts
//! - `context`: per-device handles shared by every session
//! - `config` / `paths`: settings and on-disk locations

pub mod config;
pub mod context;
pub mod error;
pub mod exchange;
pub mod inbox;
pub mod keystore;
pub mod notify;
pub mod paths;
pub mod presence;
pub mod render;
pub mod session;

pub use config::{load_config, save_config, ChatConfig, KeyStoreSettings, SessionLimits, TimingConfig};
pub use context::ChatContext;
pub use error::ChatError;
pub use exchange::{KeyConflictPolicy, KeyExchangeCoordinator, PublishOutcome};
pub use inbox::InboxEntry;
pub use keystore::KeyStore;
pub use notify::{
    BookingEventSource, DispatchHandle, EventSource, MessageEventSource, NotificationDispatcher,
    Watermark,
};
pub use presence::{count_unread, typing_is_fresh, PeerPresence, PresenceTracker};
pub use render::{TranscriptEntry, TranscriptRenderer};
pub use session::{ChatSession, SendOutcome, SessionState};
