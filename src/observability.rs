use crate::engine::{Admission, Proposal};

// ── Decision metrics ────────────────────────────────────────────

/// Counter: admission decisions. Labels: outcome.
pub const ADMISSIONS_TOTAL: &str = "roomsched_admissions_total";

/// Histogram: lock wait + decision latency of `Engine::book`, in seconds.
pub const ADMISSION_DURATION_SECONDS: &str = "roomsched_admission_duration_seconds";

/// Counter: alternative-slot searches. Labels: outcome.
pub const PROPOSALS_TOTAL: &str = "roomsched_proposals_total";

/// Counter: optimistic admissions re-run after losing an insert race.
pub const ADMISSION_RETRIES_TOTAL: &str = "roomsched_admission_retries_total";

// ── Resource metrics ────────────────────────────────────────────

/// Gauge: rooms with a current or future booking, as of the last sweep.
pub const ROOMS_ACTIVE: &str = "roomsched_rooms_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomsched_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomsched_wal_flush_batch_size";

pub fn admission_label(admission: &Admission) -> &'static str {
    match admission {
        Admission::Admitted => "admitted",
        Admission::CapacityExceeded { .. } => "capacity_exceeded",
        Admission::TimeConflict { .. } => "time_conflict",
    }
}

pub fn proposal_label(proposal: &Proposal) -> &'static str {
    match proposal {
        Proposal::Slot(_) => "slot",
        Proposal::NoSlotAvailable => "no_slot_available",
    }
}
