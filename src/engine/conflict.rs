use crate::model::*;

use super::{DaySchedule, SchedulerError};

/// Whether an occupied entry participates in a conflict check against `probe`.
///
/// A venue-wide probe sees everything on the date. A teacher-scoped probe sees
/// that teacher's own windows plus all venue-wide windows: the shared room is
/// occupied either way. Two different teachers never conflict with each other.
pub(crate) fn in_scope(occupied: ResourceKey, probe: ResourceKey) -> bool {
    match probe {
        ResourceKey::Venue => true,
        ResourceKey::Teacher(t) => {
            occupied == ResourceKey::Venue || occupied == ResourceKey::Teacher(t)
        }
    }
}

pub(crate) fn validate_window(window: &MinuteSpan) -> Result<(), SchedulerError> {
    if window.start < 0 {
        return Err(SchedulerError::InvalidRequest("window starts before the day"));
    }
    // A buffer may run past midnight, but the lesson itself must not.
    if window.start >= DAY_MINUTES {
        return Err(SchedulerError::InvalidRequest("window starts after the day"));
    }
    Ok(())
}

/// Check a buffer-expanded window against every occupied entry in scope.
/// Caller holds the day lock.
pub(crate) fn check_no_conflict(
    day: &DaySchedule,
    probe: ResourceKey,
    window: &MinuteSpan,
) -> Result<(), SchedulerError> {
    for entry in day.overlapping(window) {
        if in_scope(entry.resource, probe) {
            return Err(SchedulerError::Conflict(entry.reservation_id));
        }
    }
    Ok(())
}
