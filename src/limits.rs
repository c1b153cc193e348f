use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

// ── Booking policy ───────────────────────────────────────────────

/// Shortest reservable interval.
pub const MIN_BOOKING_DURATION_MS: Ms = 30 * MINUTE_MS;
/// A start this far behind "now" still counts as not in the past.
pub const CLOCK_SKEW_TOLERANCE_MS: Ms = MINUTE_MS;
/// Minimum lead time before `start` for a cancellation to be accepted.
pub const CANCEL_CUTOFF_MS: Ms = 2 * HOUR_MS;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

// ── Directory ────────────────────────────────────────────────────

pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_TEXT_LEN: usize = 4096;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_PASSWORD_LEN: usize = 1024;

// ── Boundary ─────────────────────────────────────────────────────

pub const MAX_TOKEN_LEN: usize = 4096;
