use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 50_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TITLE_LEN: usize = 1024;
pub const MAX_OWNER_LEN: usize = 256;

/// Earliest accepted instant (Unix epoch).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// Latest accepted instant, 9999-12-31T23:59:59.999Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// A single booking may not exceed one week.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * DAY_MS;
/// Availability and proposal searches cover at most one year.
pub const MAX_SEARCH_WINDOW_MS: Ms = 366 * DAY_MS;

/// Attempts made by the optimistic admission loop before giving up.
pub const MAX_ADMISSION_RETRIES: usize = 8;
