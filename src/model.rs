use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::SchedulerError;
use crate::limits::*;
use crate::policy::CancellationTier;

/// Minutes from midnight. The only unit the slot index computes in.
pub type Minutes = i32;

pub const DAY_MINUTES: Minutes = 24 * 60;

/// Half-open interval `[start, end)` in minutes from midnight. A buffer-expanded
/// window may extend past the end of the day; the start is always clamped at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteSpan {
    pub start: Minutes,
    pub end: Minutes,
}

impl MinuteSpan {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "MinuteSpan start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &MinuteSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &MinuteSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

pub fn time_to_minutes(t: NaiveTime) -> Minutes {
    (t.hour() * 60 + t.minute()) as Minutes
}

/// Inverse of [`time_to_minutes`]. None for values outside the day.
pub fn minutes_to_time(m: Minutes) -> Option<NaiveTime> {
    if !(0..DAY_MINUTES).contains(&m) {
        return None;
    }
    NaiveTime::from_hms_opt(m as u32 / 60, m as u32 % 60, 0)
}

/// The conflict-checking scope: a specific teacher, or the whole shared room
/// when no teacher is attached to the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKey {
    Teacher(Ulid),
    Venue,
}

impl ResourceKey {
    pub fn from_teacher(teacher_id: Option<Ulid>) -> Self {
        match teacher_id {
            Some(id) => ResourceKey::Teacher(id),
            None => ResourceKey::Venue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Location {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Attended,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Attended | ReservationStatus::Cancelled | ReservationStatus::NoShow
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoType {
    Class,
    Staff,
    Schedule,
    Admin,
    Personal,
}

/// A booked lesson. Never deleted: cancellation flips the status and records
/// the fee tier, the row stays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub student_id: Ulid,
    /// None means the booking occupies the whole venue.
    pub teacher_id: Option<Ulid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    /// Resolved from the duration policy at creation time, frozen thereafter.
    /// Later policy edits must not reach back into existing bookings.
    pub buffer_minutes: u32,
    pub location: Location,
    pub status: ReservationStatus,
    pub cancellation_tier: Option<CancellationTier>,
    /// Set by a staff-initiated reschedule; halves a later student cancellation fee.
    pub after_staff_reschedule: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// The raw lesson interval, no buffer.
    pub fn lesson_span(&self) -> MinuteSpan {
        let start = time_to_minutes(self.start_time);
        MinuteSpan::new(start, start + self.duration_minutes as Minutes)
    }

    /// The occupied window: lesson expanded by the frozen buffer on both sides,
    /// clamped at the start of the day.
    pub fn buffered_window(&self) -> MinuteSpan {
        let lesson = self.lesson_span();
        let buffer = self.buffer_minutes as Minutes;
        MinuteSpan::new((lesson.start - buffer).max(0), lesson.end + buffer)
    }

    pub fn lesson_start(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::from_teacher(self.teacher_id)
    }
}

/// One configured lesson length and its mandatory idle gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRule {
    pub duration_minutes: u32,
    pub buffer_minutes: u32,
}

/// The set of bookable lesson lengths, unique per duration, sorted ascending.
/// Loaded once per booking operation; a reservation's duration must be a member
/// at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationPolicy {
    entries: Vec<DurationRule>,
}

impl DurationPolicy {
    pub fn from_entries(mut entries: Vec<DurationRule>) -> Result<Self, SchedulerError> {
        if entries.is_empty() {
            return Err(SchedulerError::InvalidPolicy("policy has no entries"));
        }
        if entries.len() > MAX_POLICY_ENTRIES {
            return Err(SchedulerError::InvalidPolicy("too many policy entries"));
        }
        for rule in &entries {
            if rule.duration_minutes == 0 || rule.duration_minutes > MAX_DURATION_MINUTES {
                return Err(SchedulerError::InvalidPolicy("duration out of range"));
            }
            if rule.buffer_minutes > MAX_BUFFER_MINUTES {
                return Err(SchedulerError::InvalidPolicy("buffer out of range"));
            }
        }
        entries.sort_by_key(|r| r.duration_minutes);
        if entries.windows(2).any(|w| w[0].duration_minutes == w[1].duration_minutes) {
            return Err(SchedulerError::InvalidPolicy("duplicate duration"));
        }
        Ok(Self { entries })
    }

    /// Buffer configured for a duration, or None when the duration is not bookable.
    pub fn buffer_for(&self, duration_minutes: u32) -> Option<u32> {
        self.entries
            .binary_search_by_key(&duration_minutes, |r| r.duration_minutes)
            .ok()
            .map(|i| self.entries[i].buffer_minutes)
    }

    pub fn entries(&self) -> &[DurationRule] {
        &self.entries
    }
}

impl Default for DurationPolicy {
    /// The standard lesson lengths, used when no policy file is configured.
    fn default() -> Self {
        Self {
            entries: vec![
                DurationRule { duration_minutes: 30, buffer_minutes: 5 },
                DurationRule { duration_minutes: 45, buffer_minutes: 10 },
                DurationRule { duration_minutes: 60, buffer_minutes: 10 },
                DurationRule { duration_minutes: 90, buffer_minutes: 15 },
            ],
        }
    }
}

/// A note pinned to a calendar day. May soft-reference a reservation, teacher
/// or staff member; the reference is never an ownership edge, so cancelling
/// the referenced reservation leaves the memo in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memo {
    pub id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub content: String,
    pub memo_type: MemoType,
    pub is_public: bool,
    pub author_id: Ulid,
    pub reservation_id: Option<Ulid>,
    pub teacher_id: Option<Ulid>,
    pub staff_id: Option<Ulid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
pub(crate) fn sample_reservation(
    start_time: NaiveTime,
    duration_minutes: u32,
    buffer_minutes: u32,
) -> Reservation {
    Reservation {
        id: Ulid::new(),
        student_id: Ulid::new(),
        teacher_id: None,
        date: NaiveDate::from_ymd_opt(2025, 11, 10).unwrap(),
        start_time,
        duration_minutes,
        buffer_minutes,
        location: Location::Offline,
        status: ReservationStatus::Pending,
        cancellation_tier: None,
        after_staff_reschedule: false,
        notes: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = MinuteSpan::new(540, 600);
        assert_eq!(s.duration_minutes(), 60);
    }

    #[test]
    fn span_overlap() {
        let a = MinuteSpan::new(540, 600);
        let b = MinuteSpan::new(570, 630);
        let c = MinuteSpan::new(600, 660);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn span_contains_span() {
        let outer = MinuteSpan::new(480, 720);
        let inner = MinuteSpan::new(540, 600);
        let partial = MinuteSpan::new(420, 540);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn time_minute_conversions() {
        let t = NaiveTime::from_hms_opt(14, 35, 0).unwrap();
        assert_eq!(time_to_minutes(t), 14 * 60 + 35);
        assert_eq!(minutes_to_time(14 * 60 + 35), Some(t));
        assert_eq!(minutes_to_time(DAY_MINUTES), None);
        assert_eq!(minutes_to_time(-5), None);
        assert_eq!(
            minutes_to_time(0),
            Some(NaiveTime::from_hms_opt(0, 0, 0).unwrap())
        );
    }

    #[test]
    fn buffered_window_clamps_at_day_start() {
        let r = sample_reservation(NaiveTime::from_hms_opt(0, 5, 0).unwrap(), 60, 10);
        // 00:05 lesson with a 10 minute buffer cannot reach before midnight
        assert_eq!(r.buffered_window(), MinuteSpan::new(0, 75));
    }

    #[test]
    fn buffered_window_expands_both_sides() {
        let r = sample_reservation(NaiveTime::from_hms_opt(10, 0, 0).unwrap(), 60, 10);
        assert_eq!(r.lesson_span(), MinuteSpan::new(600, 660));
        assert_eq!(r.buffered_window(), MinuteSpan::new(590, 670));
    }

    #[test]
    fn resource_key_from_teacher() {
        let t = Ulid::new();
        assert_eq!(ResourceKey::from_teacher(Some(t)), ResourceKey::Teacher(t));
        assert_eq!(ResourceKey::from_teacher(None), ResourceKey::Venue);
    }

    #[test]
    fn policy_lookup() {
        let policy = DurationPolicy::default();
        assert_eq!(policy.buffer_for(60), Some(10));
        assert_eq!(policy.buffer_for(90), Some(15));
        assert_eq!(policy.buffer_for(50), None);
    }

    #[test]
    fn policy_sorts_entries() {
        let policy = DurationPolicy::from_entries(vec![
            DurationRule { duration_minutes: 90, buffer_minutes: 15 },
            DurationRule { duration_minutes: 30, buffer_minutes: 5 },
        ])
        .unwrap();
        assert_eq!(policy.entries()[0].duration_minutes, 30);
        assert_eq!(policy.entries()[1].duration_minutes, 90);
    }

    #[test]
    fn policy_rejects_duplicate_duration() {
        let result = DurationPolicy::from_entries(vec![
            DurationRule { duration_minutes: 60, buffer_minutes: 10 },
            DurationRule { duration_minutes: 60, buffer_minutes: 5 },
        ]);
        assert!(matches!(result, Err(SchedulerError::InvalidPolicy(_))));
    }

    #[test]
    fn policy_rejects_empty_and_out_of_range() {
        assert!(DurationPolicy::from_entries(vec![]).is_err());
        assert!(
            DurationPolicy::from_entries(vec![DurationRule {
                duration_minutes: 0,
                buffer_minutes: 0
            }])
            .is_err()
        );
        assert!(
            DurationPolicy::from_entries(vec![DurationRule {
                duration_minutes: 60,
                buffer_minutes: MAX_BUFFER_MINUTES + 1
            }])
            .is_err()
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(!ReservationStatus::Confirmed.is_terminal());
        assert!(ReservationStatus::Attended.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::NoShow.is_terminal());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&ReservationStatus::NoShow).unwrap();
        assert_eq!(json, "\"NO_SHOW\"");
        let json = serde_json::to_string(&MemoType::Schedule).unwrap();
        assert_eq!(json, "\"schedule\"");
    }
}
