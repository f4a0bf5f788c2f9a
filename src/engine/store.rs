use async_trait::async_trait;
use tracing::debug;
use ulid::Ulid;

use crate::limits::{MAX_ADMISSION_RETRIES, MAX_BOOKINGS_PER_ROOM};
use crate::model::*;
use crate::observability;

use super::conflict::{check_admission, now_ms, validate_span};
use super::mutations::validate_request;
use super::{Engine, EngineError};

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn list_bookings_for_room(&self, room_id: Ulid) -> Result<Vec<Booking>, EngineError>;

    /// Insert an already-admitted booking. Must fail with
    /// `EngineError::ConstraintViolation` if it overlaps a booking committed
    /// in the meantime; the check and the insert are atomic.
    async fn insert_booking(&self, booking: Booking) -> Result<(), EngineError>;

    async fn delete_booking(&self, booking_id: Ulid) -> Result<(), EngineError>;
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn get_room(&self, room_id: Ulid) -> Result<Room, EngineError>;

    /// Overwrite the cached activity flag. Best effort; never authoritative.
    async fn set_active(&self, room_id: Ulid, active: bool) -> Result<(), EngineError>;
}

/// Optimistic admission: load, decide, insert. When the insert loses a race
/// to a concurrent writer the whole sequence is re-run against fresh state,
/// up to `MAX_ADMISSION_RETRIES` attempts.
pub async fn admit<S>(store: &S, request: BookingRequest) -> Result<Booking, EngineError>
where
    S: RoomStore + BookingStore + ?Sized,
{
    validate_request(&request)?;

    for attempt in 1..=MAX_ADMISSION_RETRIES {
        let room = store.get_room(request.room_id).await?;
        let existing = store.list_bookings_for_room(request.room_id).await?;
        check_admission(&room, &existing, &request.span, request.seats)?.into_result()?;

        let booking: Booking = request.clone().into();
        match store.insert_booking(booking.clone()).await {
            Ok(()) => {
                if booking.span.end > now_ms() {
                    store.set_active(room.id, true).await?;
                }
                return Ok(booking);
            }
            Err(EngineError::ConstraintViolation(other)) => {
                metrics::counter!(observability::ADMISSION_RETRIES_TOTAL).increment(1);
                debug!(
                    room = %request.room_id,
                    "attempt {attempt} for booking {} lost to {other}, retrying",
                    request.id
                );
            }
            Err(e) => return Err(e),
        }
    }

    Err(EngineError::RetriesExhausted(MAX_ADMISSION_RETRIES))
}

#[async_trait]
impl BookingStore for Engine {
    async fn list_bookings_for_room(&self, room_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        self.get_bookings(room_id).await
    }

    async fn insert_booking(&self, booking: Booking) -> Result<(), EngineError> {
        validate_span(&booking.span)?;
        if booking.seats == 0 {
            return Err(EngineError::InvalidSeats(booking.seats));
        }
        if self.booking_to_room.contains_key(&booking.id) {
            return Err(EngineError::AlreadyExists(booking.id));
        }
        let _gate = self.wal_gate.read().await;
        let mut guard = self.write_room(booking.room_id).await?;
        // The room may have shrunk since the caller's decision.
        if booking.seats > guard.room.capacity {
            return Err(EngineError::CapacityExceeded {
                requested: booking.seats,
                capacity: guard.room.capacity,
            });
        }
        if let Some(existing) = guard.overlapping(&booking.span).next() {
            return Err(EngineError::ConstraintViolation(existing.id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings in room"));
        }
        self.commit_booking(&mut guard, booking).await
    }

    async fn delete_booking(&self, booking_id: Ulid) -> Result<(), EngineError> {
        self.cancel_booking(booking_id).await.map(|_| ())
    }
}

#[async_trait]
impl RoomStore for Engine {
    async fn get_room(&self, room_id: Ulid) -> Result<Room, EngineError> {
        Engine::get_room(self, room_id).await
    }

    async fn set_active(&self, room_id: Ulid, active: bool) -> Result<(), EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        rs.write().await.room.active = active;
        Ok(())
    }
}
