use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::SchedulerError;
use crate::model::{Reservation, ReservationStatus};

/// Named cancellation-fee bracket. Selected by elapsed time between the
/// cancellation request and lesson start, with force majeure and the
/// same-week flat fee overriding the elapsed brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationTier {
    Pre,
    DayBefore,
    SameDay,
    SameDayRepeated,
    SameWeekFlat,
    ForceMajeure,
    StaffInitiated,
}

impl CancellationTier {
    /// Short label for metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CancellationTier::Pre => "pre",
            CancellationTier::DayBefore => "day_before",
            CancellationTier::SameDay => "same_day",
            CancellationTier::SameDayRepeated => "same_day_repeated",
            CancellationTier::SameWeekFlat => "same_week_flat",
            CancellationTier::ForceMajeure => "force_majeure",
            CancellationTier::StaffInitiated => "staff_initiated",
        }
    }
}

pub const SAME_WEEK_FLAT_FEE_MINUTES: u32 = 20;

/// Same-day cancellations beyond this many in the period escalate the fee.
const SAME_DAY_REPEAT_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct CancellationContext {
    pub is_force_majeure: bool,
    pub after_staff_reschedule: bool,
    /// The cancellation request falls in the same Monday-first calendar week
    /// as the lesson.
    pub same_week_as_lesson: bool,
    pub same_day_cancel_count_this_period: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeAssessment {
    pub tier: CancellationTier,
    pub fee_minutes: u32,
}

/// Derived record of a processed cancellation, returned to the caller and
/// never stored by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationEvent {
    pub reservation_id: Ulid,
    pub cancel_request_time: NaiveDateTime,
    pub lesson_start: NaiveDateTime,
    pub tier: CancellationTier,
    pub fee_minutes: u32,
    pub is_force_majeure: bool,
    pub same_day_cancel_count_for_student: u32,
}

/// Status transition gate. Terminal states accept nothing; the only identity
/// transition is CONFIRMED to CONFIRMED, the staff-initiated reschedule.
pub fn check_transition(
    from: ReservationStatus,
    to: ReservationStatus,
) -> Result<(), SchedulerError> {
    use ReservationStatus::*;
    let allowed = matches!(
        (from, to),
        (Pending | Confirmed, Cancelled)
            | (Pending | Confirmed, Attended)
            | (Pending | Confirmed, NoShow)
            | (Pending, Confirmed)
            | (Confirmed, Confirmed)
    );
    if allowed {
        Ok(())
    } else {
        Err(SchedulerError::InvalidTransition { from, to })
    }
}

/// Pure fee computation. Precedence when several conditions hold at once:
/// FORCE_MAJEURE > SAME_DAY_REPEATED > SAME_DAY > SAME_WEEK_FLAT >
/// DAY_BEFORE > PRE. The flat same-week fee overrides the percent tiers
/// below it but never undercuts a sub-24h cancellation, which every same-day
/// request would otherwise qualify for. A cancellation requested after
/// lesson start counts as sub-24h. The post-reschedule halving applies to
/// whatever tier won.
pub fn compute_cancellation_fee(
    reservation: &Reservation,
    cancel_request_time: NaiveDateTime,
    ctx: &CancellationContext,
) -> FeeAssessment {
    let elapsed = reservation.lesson_start() - cancel_request_time;

    let elapsed_tier = if elapsed >= Duration::hours(48) {
        CancellationTier::Pre
    } else if elapsed >= Duration::hours(24) {
        CancellationTier::DayBefore
    } else if ctx.same_day_cancel_count_this_period >= SAME_DAY_REPEAT_THRESHOLD {
        CancellationTier::SameDayRepeated
    } else {
        CancellationTier::SameDay
    };

    let mut matched = vec![elapsed_tier];
    if ctx.same_week_as_lesson {
        matched.push(CancellationTier::SameWeekFlat);
    }
    if ctx.is_force_majeure {
        matched.push(CancellationTier::ForceMajeure);
    }
    if matched.len() > 1 {
        tracing::warn!(
            reservation_id = %reservation.id,
            tiers = ?matched,
            "multiple cancellation tiers matched, applying fixed precedence"
        );
        metrics::counter!(crate::observability::POLICY_AMBIGUITY_TOTAL).increment(1);
    }

    let tier = if ctx.is_force_majeure {
        CancellationTier::ForceMajeure
    } else if matches!(
        elapsed_tier,
        CancellationTier::SameDay | CancellationTier::SameDayRepeated
    ) {
        elapsed_tier
    } else if ctx.same_week_as_lesson {
        CancellationTier::SameWeekFlat
    } else {
        elapsed_tier
    };

    let duration = reservation.duration_minutes;
    let base = match tier {
        CancellationTier::Pre | CancellationTier::StaffInitiated => 0,
        CancellationTier::DayBefore | CancellationTier::ForceMajeure => duration * 50 / 100,
        CancellationTier::SameDay => duration,
        CancellationTier::SameDayRepeated => duration * 2,
        CancellationTier::SameWeekFlat => SAME_WEEK_FLAT_FEE_MINUTES,
    };

    let fee_minutes = if ctx.after_staff_reschedule { base / 2 } else { base };

    FeeAssessment { tier, fee_minutes }
}

/// Assessment for a staff-side change with no student cancellation.
pub fn staff_initiated() -> FeeAssessment {
    FeeAssessment {
        tier: CancellationTier::StaffInitiated,
        fee_minutes: 0,
    }
}
