//! In-memory booking feed.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use sx_proto::BookingRecord;

use crate::{clock::SharedClock, error::StoreError, store::BookingFeed};

pub struct InMemoryBookingFeed {
    bookings: Mutex<Vec<BookingRecord>>,
    clock: SharedClock,
    unavailable: AtomicBool,
}

impl InMemoryBookingFeed {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            bookings: Mutex::new(Vec::new()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn record_booking(
        &self,
        provider_id: &str,
        requester_id: &str,
        listing_title: Option<&str>,
    ) -> BookingRecord {
        let booking = BookingRecord {
            id: uuid::Uuid::new_v4().to_string(),
            provider_id: provider_id.to_string(),
            requester_id: requester_id.to_string(),
            listing_title: listing_title.map(str::to_string),
            created_at: self.clock.now(),
        };
        self.bookings.lock().push(booking.clone());
        booking
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl BookingFeed for InMemoryBookingFeed {
    async fn bookings_for(&self, user_id: &str) -> Result<Vec<BookingRecord>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("booking ledger unreachable".into()));
        }
        Ok(self
            .bookings
            .lock()
            .iter()
            .filter(|b| b.provider_id == user_id)
            .cloned()
            .collect())
    }
}
