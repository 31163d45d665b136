//! Notification events.
//!
//! Bookings live in the marketplace's ledger, not in this subsystem; only
//! the fields needed to announce a new one are modelled here.

use serde::{Deserialize, Serialize};

use crate::{message::Message, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRecord {
    pub id: String,
    /// User offering the skill; the one who gets notified.
    pub provider_id: String,
    pub requester_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listing_title: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    NewMessage {
        conversation_id: String,
        sender_id: String,
    },
    NewBooking {
        booking_id: String,
        requester_id: String,
        listing_title: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    /// Stable per underlying record (`message:<id>` / `booking:<id>`).
    pub id: String,
    pub target_user_id: String,
    pub kind: NotificationKind,
    /// Causal timestamp used against the watermark.
    pub occurred_at: Timestamp,
}

impl NotificationEvent {
    pub fn for_message(target_user_id: &str, message: &Message) -> Self {
        Self {
            id: format!("message:{}", message.id),
            target_user_id: target_user_id.to_string(),
            kind: NotificationKind::NewMessage {
                conversation_id: message.conversation_id.clone(),
                sender_id: message.sender_id.clone(),
            },
            occurred_at: message.created_at,
        }
    }

    pub fn for_booking(booking: &BookingRecord) -> Self {
        Self {
            id: format!("booking:{}", booking.id),
            target_user_id: booking.provider_id.clone(),
            kind: NotificationKind::NewBooking {
                booking_id: booking.id.clone(),
                requester_id: booking.requester_id.clone(),
                listing_title: booking.listing_title.clone(),
            },
            occurred_at: booking.created_at,
        }
    }
}
