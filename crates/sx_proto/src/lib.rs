//! sx_proto: Records shared between chat clients and the document store.
//!
//! Field names are camelCase on the wire so documents stay readable by the
//! rest of the marketplace, which uses the same store.
//!
//! # Modules
//! - `conversation`: two-party conversation document + merge patches
//! - `message`: append-only sealed message records
//! - `event`: notification events and the booking record they watch

pub mod conversation;
pub mod event;
pub mod message;

pub use conversation::{merge_json, Conversation, ConversationPatch};
pub use event::{BookingRecord, NotificationEvent, NotificationKind};
pub use message::{sort_chronologically, Message, MessageKind, NewMessage};

/// Wall-clock timestamp used on every record.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
