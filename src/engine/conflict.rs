use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Validate a booking request in full before anything is locked or written.
/// Checks run in a fixed order so the first failing rule is the one reported.
pub(crate) fn validate_request(
    requester: Ulid,
    resource: Ulid,
    start: Ms,
    end: Ms,
    now: Ms,
) -> Result<Span, EngineError> {
    if requester.is_nil() || resource.is_nil() {
        return Err(EngineError::InvalidRequest("requester and resource are required"));
    }
    if end <= start {
        return Err(EngineError::InvalidRequest("end must be after start"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() < MIN_BOOKING_DURATION_MS {
        return Err(EngineError::InvalidRequest("minimum duration is 30 minutes"));
    }
    if start < now - CLOCK_SKEW_TOLERANCE_MS {
        return Err(EngineError::InvalidRequest("no past bookings"));
    }
    validate_span(&span)?;
    Ok(span)
}

/// Both ends must be representable as RFC3339 output.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// True iff an active booking on `rs` overlaps `span`. Pure read.
pub fn has_conflict(rs: &ResourceState, span: &Span) -> bool {
    rs.count_overlapping(span) > 0
}

/// Like [`has_conflict`], but names the earliest blocking booking.
pub(crate) fn check_no_conflict(rs: &ResourceState, span: &Span) -> Result<(), EngineError> {
    match rs.overlapping(span).find(|b| b.status.is_active()) {
        Some(blocking) => Err(EngineError::Conflict(blocking.id)),
        None => Ok(()),
    }
}
