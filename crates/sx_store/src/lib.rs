//! sx_store: Store contract for SkillExchange secure chat
//!
//! The chat subsystem does not own its document store. It talks to one
//! through `ChatStore`, which needs five capabilities: find-or-create a
//! conversation by participant pair, append a message, subscribe to a
//! conversation's messages, read + merge-write conversation fields, and list
//! a user's conversations.
//!
//! # Modules
//! - `store`: `ChatStore` and `BookingFeed` traits
//! - `subscription`: one `Subscription` capability, push or poll-with-diff
//! - `memory`: in-memory store (push subscriptions), used by tests and the simulator
//! - `polling`: wrapper turning any store into a poll-based one
//! - `booking`: in-memory booking feed
//! - `keyvault`: local persistence of the device key pair (SQLite via sqlx)
//! - `clock`: wall-clock sources, including one that follows tokio's pausable time

pub mod booking;
pub mod clock;
pub mod error;
pub mod keyvault;
pub mod memory;
pub mod polling;
pub mod store;
pub mod subscription;

pub use booking::InMemoryBookingFeed;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock, TokioClock};
pub use error::StoreError;
pub use keyvault::{KeyPersistence, MemoryKeyVault, SqliteKeyVault, StoredKeyPair};
pub use memory::InMemoryStore;
pub use polling::PollingStore;
pub use store::{BookingFeed, ChatStore};
pub use subscription::Subscription;
