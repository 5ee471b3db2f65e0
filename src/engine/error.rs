use ulid::Ulid;

use crate::model::ReservationStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Requested window overlaps an existing non-cancelled booking after
    /// buffer expansion. Never auto-retried by the core.
    Conflict(Ulid),
    /// Duration is not a member of the active duration policy.
    InvalidDuration(u32),
    /// No free slot remains within the search bound.
    SlotsExhausted,
    NotFound(Ulid),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    InvalidPolicy(&'static str),
    InvalidRequest(&'static str),
    /// Opaque failure from the storage collaborator. Retry policy is the
    /// caller's business.
    Storage(String),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::Conflict(id) => write!(f, "conflict with reservation: {id}"),
            SchedulerError::InvalidDuration(minutes) => {
                write!(f, "duration not in policy: {minutes} minutes")
            }
            SchedulerError::SlotsExhausted => write!(f, "no free slot remains in the day"),
            SchedulerError::NotFound(id) => write!(f, "not found: {id}"),
            SchedulerError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from:?} -> {to:?}")
            }
            SchedulerError::InvalidPolicy(msg) => write!(f, "invalid duration policy: {msg}"),
            SchedulerError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            SchedulerError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Stable machine-readable code surfaced on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Conflict(_) => "conflict",
            SchedulerError::InvalidDuration(_) => "invalid_duration",
            SchedulerError::SlotsExhausted => "slots_exhausted",
            SchedulerError::NotFound(_) => "not_found",
            SchedulerError::InvalidTransition { .. } => "invalid_transition",
            SchedulerError::InvalidPolicy(_) => "invalid_policy",
            SchedulerError::InvalidRequest(_) => "invalid_request",
            SchedulerError::Storage(_) => "storage",
        }
    }
}
