use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Regular bookings must start within this distance of "now".
pub const BOOKING_WINDOW_MS: Ms = 7 * DAY_MS;

/// Number of weekly occurrences in a semester booking.
pub const SEMESTER_WEEKS: u32 = 15;

/// 1970-01-01 .. 2200-01-01
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single booking (or one semester occurrence) may not exceed a week.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * DAY_MS;

pub const MAX_PURPOSE_LEN: usize = 1024;
pub const MAX_LOGIN_LEN: usize = 128;
