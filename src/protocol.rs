use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::{DayCell, ViewMode};
use crate::engine::{BookedWindow, SchedulerError};
use crate::model::{DurationRule, Location, MemoType, MinuteSpan, Reservation, ReservationStatus};
use crate::notify::ScheduleEvent;
use crate::policy::{CancellationEvent, CancellationTier};

fn default_granularity() -> u32 {
    5
}

/// One request line on the wire. Every mutation the booking screens used to
/// perform in place is an explicit command here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    CreateReservation {
        student_id: Ulid,
        #[serde(default)]
        teacher_id: Option<Ulid>,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
        location: Location,
        #[serde(default)]
        notes: Option<String>,
    },
    ConfirmReservation {
        id: Ulid,
    },
    CancelReservation {
        id: Ulid,
        cancel_request_time: NaiveDateTime,
        #[serde(default)]
        is_force_majeure: bool,
    },
    MarkAttended {
        id: Ulid,
    },
    MarkNoShow {
        id: Ulid,
    },
    StaffReschedule {
        id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
    },
    /// First free slot on or after `from_time`; the silent re-pick used when a
    /// chosen time got booked out from under the user.
    PickSlot {
        date: NaiveDate,
        #[serde(default)]
        teacher_id: Option<Ulid>,
        duration_minutes: u32,
        from_time: NaiveTime,
    },
    GetAvailability {
        date: NaiveDate,
        #[serde(default)]
        teacher_id: Option<Ulid>,
        /// When given, the response carries candidate start times for this
        /// duration as well.
        #[serde(default)]
        duration_minutes: Option<u32>,
        #[serde(default = "default_granularity")]
        granularity_minutes: u32,
    },
    GetCalendar {
        view_mode: ViewMode,
        anchor_date: NaiveDate,
        #[serde(default)]
        teacher_id: Option<Ulid>,
    },
    CreateMemo {
        date: NaiveDate,
        time: NaiveTime,
        content: String,
        memo_type: MemoType,
        is_public: bool,
        author_id: Ulid,
        #[serde(default)]
        reservation_id: Option<Ulid>,
        #[serde(default)]
        teacher_id: Option<Ulid>,
        #[serde(default)]
        staff_id: Option<Ulid>,
    },
    UpdateMemo {
        id: Ulid,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        time: Option<NaiveTime>,
        #[serde(default)]
        memo_type: Option<MemoType>,
        #[serde(default)]
        is_public: Option<bool>,
    },
    SetDurationPolicy {
        entries: Vec<DurationRule>,
    },
    /// Switch the connection into streaming mode for one date's events.
    Watch {
        date: NaiveDate,
    },
}

impl Request {
    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Request::CreateReservation { .. } => "create_reservation",
            Request::ConfirmReservation { .. } => "confirm_reservation",
            Request::CancelReservation { .. } => "cancel_reservation",
            Request::MarkAttended { .. } => "mark_attended",
            Request::MarkNoShow { .. } => "mark_no_show",
            Request::StaffReschedule { .. } => "staff_reschedule",
            Request::PickSlot { .. } => "pick_slot",
            Request::GetAvailability { .. } => "get_availability",
            Request::GetCalendar { .. } => "get_calendar",
            Request::CreateMemo { .. } => "create_memo",
            Request::UpdateMemo { .. } => "update_memo",
            Request::SetDurationPolicy { .. } => "set_duration_policy",
            Request::Watch { .. } => "watch",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Reservation {
        reservation: Reservation,
    },
    Cancellation {
        tier: CancellationTier,
        fee_minutes: u32,
        new_status: ReservationStatus,
        event: CancellationEvent,
    },
    Slot {
        start_time: NaiveTime,
    },
    Availability {
        booked: Vec<BookedWindow>,
        free: Vec<MinuteSpan>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slots: Option<Vec<NaiveTime>>,
    },
    Calendar {
        cells: Vec<DayCell>,
    },
    Memo {
        memo: crate::model::Memo,
    },
    PolicyUpdated {
        entries: Vec<DurationRule>,
    },
    Watching {
        date: NaiveDate,
    },
    /// Streamed after `Watching` while the connection stays open.
    Event {
        event: ScheduleEvent,
    },
    Error {
        code: String,
        message: String,
    },
}

impl Response {
    pub fn error(e: &SchedulerError) -> Self {
        Response::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}
