use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::{Proposal, free_slots, propose_alternative};
use super::{Engine, EngineError};

fn validate_window(window: &Span) -> Result<(), EngineError> {
    if !window.is_valid() {
        return Err(EngineError::InvalidSpan {
            start: window.start,
            end: window.end,
        });
    }
    if window.duration_ms() > MAX_SEARCH_WINDOW_MS {
        return Err(EngineError::LimitExceeded("search window too wide"));
    }
    Ok(())
}

impl Engine {
    pub async fn get_room(&self, room_id: Ulid) -> Result<Room, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::new();
        for rs in self.room_handles() {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    /// Bookings of one room, sorted by start.
    pub async fn get_bookings(&self, room_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.bookings.clone())
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let room_id = self
            .get_room_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let guard = rs.read().await;
        guard
            .bookings
            .iter()
            .find(|b| b.id == booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }

    /// Every booking made by `owner`, across rooms, sorted by start.
    pub async fn get_bookings_for_owner(&self, owner: &str) -> Vec<Booking> {
        let mut found = Vec::new();
        for rs in self.room_handles() {
            let guard = rs.read().await;
            found.extend(guard.bookings.iter().filter(|b| b.owner == owner).cloned());
        }
        found.sort_by_key(|b| (b.span.start, b.id));
        found
    }

    /// Free gaps of a room inside `window`, optionally only those of at least
    /// `min_duration_ms`.
    pub async fn availability(
        &self,
        room_id: Ulid,
        window: Span,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        validate_window(&window)?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;

        let mut free = free_slots(&guard.room, &guard.bookings, &window);
        if let Some(min_dur) = min_duration_ms {
            free.retain(|span| span.duration_ms() >= min_dur);
        }
        Ok(free)
    }

    /// Earliest slot of `duration_ms` in `window` that the room could admit.
    /// The window is taken as given; pass the current time as its start to
    /// exclude the past.
    pub async fn propose_alternative(
        &self,
        room_id: Ulid,
        duration_ms: Ms,
        window: Span,
    ) -> Result<Proposal, EngineError> {
        validate_window(&window)?;
        if duration_ms > MAX_SPAN_DURATION_MS {
            return Err(EngineError::LimitExceeded("span too wide"));
        }
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;

        let proposal = propose_alternative(&guard.room, &guard.bookings, duration_ms, &window)?;
        metrics::counter!(
            observability::PROPOSALS_TOTAL,
            "outcome" => observability::proposal_label(&proposal)
        )
        .increment(1);
        Ok(proposal)
    }
}
