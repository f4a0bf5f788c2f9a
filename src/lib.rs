pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod sweeper;
pub mod wal;

pub use engine::{
    Admission, Engine, EngineError, Proposal, check_admission, free_slots, propose_alternative,
};
pub use model::{Booking, BookingRequest, Ms, Room, Span};
