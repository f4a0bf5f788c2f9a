use ulid::Ulid;

use crate::model::{Booking, Ms};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidSpan { start: Ms, end: Ms },
    InvalidSeats(u32),
    InvalidCapacity(u32),
    InvalidDuration(Ms),
    CapacityExceeded { requested: u32, capacity: u32 },
    /// Every admitted booking the request overlaps.
    Conflict(Vec<Booking>),
    CapacityBelowBookings { capacity: u32, booked: u32 },
    HasBookings(Ulid),
    NoSlotAvailable,
    /// Insert refused by the store's exclusion check; carries the booking in the way.
    ConstraintViolation(Ulid),
    RetriesExhausted(usize),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidSpan { start, end } => {
                write!(f, "invalid interval [{start}, {end}): start must be before end")
            }
            EngineError::InvalidSeats(n) => write!(f, "invalid seat count {n}: must be at least 1"),
            EngineError::InvalidCapacity(n) => {
                write!(f, "invalid room capacity {n}: must be at least 1")
            }
            EngineError::InvalidDuration(d) => write!(f, "invalid duration {d}ms: must be positive"),
            EngineError::CapacityExceeded {
                requested,
                capacity,
            } => write!(f, "{requested} seats requested but room holds {capacity}"),
            EngineError::Conflict(bookings) => {
                write!(f, "conflicts with booking(s):")?;
                for b in bookings {
                    write!(f, " {} [{}, {})", b.id, b.span.start, b.span.end)?;
                }
                Ok(())
            }
            EngineError::CapacityBelowBookings { capacity, booked } => write!(
                f,
                "capacity {capacity} is below an upcoming booking of {booked} seats"
            ),
            EngineError::HasBookings(id) => {
                write!(f, "cannot delete room {id}: has bookings")
            }
            EngineError::NoSlotAvailable => write!(f, "no free slot in search window"),
            EngineError::ConstraintViolation(id) => {
                write!(f, "insert rejected: overlaps booking {id}")
            }
            EngineError::RetriesExhausted(n) => write!(f, "admission gave up after {n} attempts"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
