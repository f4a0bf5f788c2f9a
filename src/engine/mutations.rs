use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{Admission, check_admission, now_ms, validate_span};
use super::{Engine, EngineError, WalCommand};

/// Checks shared by every path that turns a request into a booking.
pub(super) fn validate_request(req: &BookingRequest) -> Result<(), EngineError> {
    validate_span(&req.span)?;
    if req.seats == 0 {
        return Err(EngineError::InvalidSeats(req.seats));
    }
    if req.owner.len() > MAX_OWNER_LEN {
        return Err(EngineError::LimitExceeded("owner too long"));
    }
    if let Some(ref t) = req.title
        && t.len() > MAX_TITLE_LEN
    {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_room(
        &self,
        id: Ulid,
        name: Option<String>,
        capacity: u32,
        created_by: String,
    ) -> Result<(), EngineError> {
        if capacity == 0 {
            return Err(EngineError::InvalidCapacity(capacity));
        }
        if self.state.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        if created_by.len() > MAX_OWNER_LEN {
            return Err(EngineError::LimitExceeded("owner too long"));
        }

        let _gate = self.wal_gate.read().await;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::RoomCreated {
            id,
            name: name.clone(),
            capacity,
            created_by: created_by.clone(),
        };
        self.wal_append(&event).await?;
        let rs = RoomState::new(id, name, capacity, created_by);
        self.state.insert(id, Arc::new(RwLock::new(rs)));
        info!(room = %id, capacity, "room created");
        Ok(())
    }

    /// Rename or resize a room. Capacity may not drop below the seats held by
    /// any booking that has not ended yet.
    pub async fn update_room(
        &self,
        id: Ulid,
        name: Option<String>,
        capacity: u32,
    ) -> Result<(), EngineError> {
        if capacity == 0 {
            return Err(EngineError::InvalidCapacity(capacity));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("room name too long"));
        }

        let _gate = self.wal_gate.read().await;
        let mut guard = self.write_room(id).await?;
        if let Some(booked) = guard.upcoming(now_ms()).map(|b| b.seats).max()
            && booked > capacity
        {
            return Err(EngineError::CapacityBelowBookings { capacity, booked });
        }

        let event = Event::RoomUpdated { id, name, capacity };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Delete an empty room. Bookings must be cancelled first.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.wal_gate.read().await;
        let guard = self.write_room(id).await?;
        if !guard.bookings.is_empty() {
            return Err(EngineError::HasBookings(id));
        }

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        drop(guard);
        info!(room = %id, "room deleted");
        Ok(())
    }

    /// Admit a booking. The room's write lock is held across
    /// load-decide-insert, so admissions for one room are serialized while
    /// different rooms proceed independently.
    pub async fn book(&self, request: BookingRequest) -> Result<Booking, EngineError> {
        validate_request(&request)?;
        if self.booking_to_room.contains_key(&request.id) {
            return Err(EngineError::AlreadyExists(request.id));
        }

        let started = std::time::Instant::now();
        let _gate = self.wal_gate.read().await;
        let mut guard = self.write_room(request.room_id).await?;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings in room"));
        }

        let admission = check_admission(&guard.room, &guard.bookings, &request.span, request.seats)?;
        metrics::counter!(
            observability::ADMISSIONS_TOTAL,
            "outcome" => observability::admission_label(&admission)
        )
        .increment(1);
        metrics::histogram!(observability::ADMISSION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        if let Admission::TimeConflict { conflicting } = &admission {
            debug!(
                room = %request.room_id,
                "booking {} rejected: overlaps {} booking(s)",
                request.id,
                conflicting.len()
            );
        }
        admission.into_result()?;

        let booking: Booking = request.into();
        self.commit_booking(&mut guard, booking.clone()).await?;
        info!(
            booking = %booking.id,
            room = %booking.room_id,
            owner = %booking.owner,
            "booking admitted [{}, {})",
            booking.span.start,
            booking.span.end
        );
        Ok(booking)
    }

    /// Cancel a booking, returning the room it belonged to.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _gate = self.wal_gate.read().await;
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        // Another cancel may have won the race for the lock.
        if !guard.bookings.iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BookingCancelled { id, room_id };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(booking = %id, room = %room_id, "booking cancelled");
        Ok(room_id)
    }

    /// Recompute every room's cached `active` flag. Returns how many rooms
    /// have a current or future booking at `now`.
    pub async fn refresh_active(&self, now: Ms) -> usize {
        let mut active = 0;
        for rs in self.room_handles() {
            if rs.write().await.refresh_active(now) {
                active += 1;
            }
        }
        metrics::gauge!(observability::ROOMS_ACTIVE).set(active as f64);
        active
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.wal_gate.write().await;

        let mut events = Vec::new();
        for rs in self.room_handles() {
            let guard = rs.read().await;
            events.push(Event::RoomCreated {
                id: guard.room.id,
                name: guard.room.name.clone(),
                capacity: guard.room.capacity,
                created_by: guard.room.created_by.clone(),
            });
            for booking in &guard.bookings {
                events.push(Event::BookingAdmitted {
                    booking: booking.clone(),
                });
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
