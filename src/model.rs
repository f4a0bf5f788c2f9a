use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;

/// Unix milliseconds. The only time type.
///
/// Instants are absolute, so an interval running past midnight is just a
/// larger `end`; nothing is ever reduced to minutes-since-midnight.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Build a span from values already known to be ordered.
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from caller input, rejecting zero-length and inverted ranges.
    pub fn try_new(start: Ms, end: Ms) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidSpan { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    /// Length in ms, saturating at `Ms::MAX` for spans wider than that.
    pub fn duration_ms(&self) -> Ms {
        self.end.saturating_sub(self.start)
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: Option<String>,
    /// Seats available to a single booking.
    pub capacity: u32,
    /// Cached "has a current or future booking". Never consulted for conflicts.
    pub active: bool,
    /// Principal that created the room.
    pub created_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub span: Span,
    /// Authenticated principal that requested the booking.
    pub owner: String,
    pub seats: u32,
    pub title: Option<String>,
}

/// A booking that has not been admitted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub room_id: Ulid,
    pub span: Span,
    pub owner: String,
    pub seats: u32,
    pub title: Option<String>,
}

impl From<BookingRequest> for Booking {
    fn from(req: BookingRequest) -> Self {
        Self {
            id: req.id,
            room_id: req.room_id,
            span: req.span,
            owner: req.owner,
            seats: req.seats,
            title: req.title,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Admitted bookings, sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(id: Ulid, name: Option<String>, capacity: u32, created_by: String) -> Self {
        Self {
            room: Room {
                id,
                name,
                capacity,
                active: false,
                created_by,
            },
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// Remove booking by id.
    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Bookings that have not ended at `now`.
    pub fn upcoming(&self, now: Ms) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(move |b| b.span.end > now)
    }

    /// Recompute the cached `active` flag from the booking set.
    pub fn refresh_active(&mut self, now: Ms) -> bool {
        let active = self.upcoming(now).next().is_some();
        self.room.active = active;
        active
    }
}

/// The WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        name: Option<String>,
        capacity: u32,
        created_by: String,
    },
    RoomUpdated {
        id: Ulid,
        name: Option<String>,
        capacity: u32,
    },
    RoomDeleted {
        id: Ulid,
    },
    BookingAdmitted {
        booking: Booking,
    },
    BookingCancelled {
        id: Ulid,
        room_id: Ulid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn booking(start: Ms, end: Ms) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            span: Span::new(start, end),
            owner: "alice".into(),
            seats: 1,
            title: None,
        }
    }

    fn room() -> RoomState {
        RoomState::new(Ulid::new(), None, 10, "alice".into())
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_try_new_rejects_empty_and_inverted() {
        assert!(matches!(
            Span::try_new(100, 100),
            Err(EngineError::InvalidSpan { start: 100, end: 100 })
        ));
        assert!(matches!(
            Span::try_new(200, 100),
            Err(EngineError::InvalidSpan { .. })
        ));
        assert_eq!(Span::try_new(100, 101).unwrap(), Span::new(100, 101));
    }

    #[test]
    fn span_across_midnight_overlaps_next_morning() {
        let day = 24 * H;
        let late = Span::new(23 * H + 30 * M, day + 30 * M);
        let early = Span::new(day, day + H);
        assert!(late.overlaps(&early));
        assert_eq!(late.duration_ms(), H);
    }

    #[test]
    fn duration_of_widest_span_saturates() {
        assert_eq!(Span::new(Ms::MIN, Ms::MAX).duration_ms(), Ms::MAX);
        assert_eq!(Span::new(-5, 5).duration_ms(), 10);
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn booking_ordering() {
        let mut rs = room();
        rs.insert_booking(booking(300, 400));
        rs.insert_booking(booking(100, 200));
        rs.insert_booking(booking(200, 300));
        let starts: Vec<Ms> = rs.bookings.iter().map(|b| b.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn remove_middle_preserves_order() {
        let mut rs = room();
        let bookings: Vec<Booking> = (0..3).map(|i| booking(i * 100, i * 100 + 50)).collect();
        for b in &bookings {
            rs.insert_booking(b.clone());
        }
        let removed = rs.remove_booking(bookings[1].id).unwrap();
        assert_eq!(removed.id, bookings[1].id);
        assert_eq!(rs.bookings.len(), 2);
        assert_eq!(rs.bookings[0].id, bookings[0].id);
        assert_eq!(rs.bookings[1].id, bookings[2].id);
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut rs = room();
        rs.insert_booking(booking(100, 200));
        assert!(rs.remove_booking(Ulid::new()).is_none());
        assert_eq!(rs.bookings.len(), 1);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = room();
        rs.insert_booking(booking(100, 200));
        rs.insert_booking(booking(450, 600));
        rs.insert_booking(booking(1000, 1100));

        let hits: Vec<_> = rs.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = room();
        rs.insert_booking(booking(100, 200));
        assert_eq!(rs.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(rs.overlapping(&Span::new(0, 100)).count(), 0);
    }

    #[test]
    fn overlapping_single_ms_overlap() {
        let mut rs = room();
        rs.insert_booking(booking(100, 201));
        assert_eq!(rs.overlapping(&Span::new(200, 300)).count(), 1);
    }

    #[test]
    fn refresh_active_tracks_upcoming_bookings() {
        let mut rs = room();
        assert!(!rs.refresh_active(0));

        rs.insert_booking(booking(100, 200));
        assert!(rs.refresh_active(150)); // current
        assert!(rs.refresh_active(50)); // future
        assert!(!rs.refresh_active(200)); // ended exactly now
        assert!(!rs.room.active);
    }

    #[test]
    fn request_converts_to_booking() {
        let req = BookingRequest {
            id: Ulid::new(),
            room_id: Ulid::new(),
            span: Span::new(0, 10),
            owner: "bob".into(),
            seats: 4,
            title: Some("standup".into()),
        };
        let b: Booking = req.clone().into();
        assert_eq!(b.id, req.id);
        assert_eq!(b.room_id, req.room_id);
        assert_eq!(b.seats, 4);
        assert_eq!(b.title.as_deref(), Some("standup"));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingAdmitted {
            booking: booking(1000, 2000),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
