use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tokio::sync::{RwLock, broadcast};
use ulid::Ulid;

use crate::calendar::{self, CalendarItem, DayCell, ViewMode};
use crate::engine::{BookedWindow, SchedulerError, SlotIndex};
use crate::limits::*;
use crate::model::*;
use crate::notify::{NotifyHub, ScheduleEvent};
use crate::observability;
use crate::policy::{self, CancellationContext, CancellationEvent};
use crate::store::ReservationStore;

pub struct NewReservation {
    pub student_id: Ulid,
    pub teacher_id: Option<Ulid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
    pub location: Location,
    pub notes: Option<String>,
}

pub struct NewMemo {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub content: String,
    pub memo_type: MemoType,
    pub is_public: bool,
    pub author_id: Ulid,
    pub reservation_id: Option<Ulid>,
    pub teacher_id: Option<Ulid>,
    pub staff_id: Option<Ulid>,
}

#[derive(Debug, Default, Clone)]
pub struct MemoPatch {
    pub content: Option<String>,
    pub time: Option<NaiveTime>,
    pub memo_type: Option<MemoType>,
    pub is_public: Option<bool>,
}

pub struct AvailabilityView {
    pub booked: Vec<BookedWindow>,
    pub free: Vec<MinuteSpan>,
    /// Candidate start times, present when a duration was requested.
    pub slots: Option<Vec<NaiveTime>>,
}

/// The service façade every transport talks to. Holds the slot index (the
/// conflict arbiter), the duration policy, the storage collaborator and the
/// notify hub; the policy and calendar modules stay pure underneath.
pub struct Scheduler {
    index: SlotIndex,
    store: Arc<dyn ReservationStore>,
    duration_policy: RwLock<DurationPolicy>,
    notify: NotifyHub,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ReservationStore>, duration_policy: DurationPolicy) -> Self {
        Self {
            index: SlotIndex::new(),
            store,
            duration_policy: RwLock::new(duration_policy),
            notify: NotifyHub::new(),
        }
    }

    pub fn subscribe(&self, date: NaiveDate) -> broadcast::Receiver<ScheduleEvent> {
        self.notify.subscribe(date)
    }

    /// Resolve the buffer for a duration from the policy as loaded right now.
    /// The result is frozen onto the reservation; later policy edits never
    /// reach back.
    async fn resolve_buffer(&self, duration_minutes: u32) -> Result<u32, SchedulerError> {
        self.duration_policy
            .read()
            .await
            .buffer_for(duration_minutes)
            .ok_or(SchedulerError::InvalidDuration(duration_minutes))
    }

    pub async fn create_reservation(
        &self,
        cmd: NewReservation,
    ) -> Result<Reservation, SchedulerError> {
        if let Some(ref notes) = cmd.notes
            && notes.len() > MAX_NOTES_LEN
        {
            return Err(SchedulerError::InvalidRequest("notes too long"));
        }
        let start = time_to_minutes(cmd.start_time);
        if start + cmd.duration_minutes as Minutes > DAY_MINUTES {
            return Err(SchedulerError::InvalidRequest("lesson runs past midnight"));
        }
        let buffer_minutes = self.resolve_buffer(cmd.duration_minutes).await?;

        let now = Utc::now();
        let reservation = Reservation {
            id: Ulid::new(),
            student_id: cmd.student_id,
            teacher_id: cmd.teacher_id,
            date: cmd.date,
            start_time: cmd.start_time,
            duration_minutes: cmd.duration_minutes,
            buffer_minutes,
            location: cmd.location,
            status: ReservationStatus::Pending,
            cancellation_tier: None,
            after_staff_reschedule: false,
            notes: cmd.notes,
            created_at: now,
            updated_at: now,
        };

        // The index is the arbiter: reserve the window first, persist second.
        if let Err(e) = self.index.insert(&reservation).await {
            if matches!(e, SchedulerError::Conflict(_)) {
                metrics::counter!(observability::CONFLICTS_TOTAL).increment(1);
            }
            return Err(e);
        }
        if let Err(e) = self.store.insert_reservation(reservation.clone()).await {
            // Roll the window back out so the failed booking doesn't squat.
            self.index.remove(reservation.id).await;
            return Err(e);
        }

        metrics::counter!(observability::RESERVATIONS_TOTAL).increment(1);
        tracing::info!(
            reservation_id = %reservation.id,
            date = %reservation.date,
            start = %reservation.start_time,
            "reservation booked"
        );
        self.notify.send(
            reservation.date,
            &ScheduleEvent::Booked {
                reservation_id: reservation.id,
                date: reservation.date,
                window: reservation.buffered_window(),
            },
        );
        Ok(reservation)
    }

    /// First free slot on or after `from_time` on the five-minute grid.
    pub async fn pick_slot(
        &self,
        date: NaiveDate,
        teacher_id: Option<Ulid>,
        duration_minutes: u32,
        from_time: NaiveTime,
    ) -> Result<NaiveTime, SchedulerError> {
        let buffer = self.resolve_buffer(duration_minutes).await?;
        let start = self
            .index
            .first_slot_on_or_after(
                date,
                teacher_id,
                duration_minutes,
                buffer,
                time_to_minutes(from_time),
            )
            .await?;
        minutes_to_time(start).ok_or(SchedulerError::SlotsExhausted)
    }

    pub async fn availability(
        &self,
        date: NaiveDate,
        teacher_id: Option<Ulid>,
        duration_minutes: Option<u32>,
        granularity_minutes: u32,
    ) -> Result<AvailabilityView, SchedulerError> {
        if granularity_minutes == 0 || granularity_minutes > 60 {
            return Err(SchedulerError::InvalidRequest("granularity out of range"));
        }
        let booked = self.index.booked_windows(date, teacher_id).await;
        let free = self
            .index
            .free_windows(date, teacher_id, MinuteSpan::new(0, DAY_MINUTES))
            .await;
        let slots = match duration_minutes {
            Some(duration) => {
                let buffer = self.resolve_buffer(duration).await?;
                let starts = self
                    .index
                    .list_slots(date, teacher_id, duration, buffer, granularity_minutes)
                    .await;
                Some(starts.into_iter().filter_map(minutes_to_time).collect())
            }
            None => None,
        };
        Ok(AvailabilityView { booked, free, slots })
    }

    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        cancel_request_time: NaiveDateTime,
        is_force_majeure: bool,
    ) -> Result<CancellationEvent, SchedulerError> {
        let mut reservation = self
            .store
            .reservation(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))?;
        policy::check_transition(reservation.status, ReservationStatus::Cancelled)?;

        let count = self
            .store
            .same_day_cancellations_in_month(reservation.student_id, cancel_request_time.date())
            .await?;
        let ctx = CancellationContext {
            is_force_majeure,
            after_staff_reschedule: reservation.after_staff_reschedule,
            same_week_as_lesson: calendar::same_iso_week(
                cancel_request_time.date(),
                reservation.date,
            ),
            same_day_cancel_count_this_period: count,
        };
        let fee = policy::compute_cancellation_fee(&reservation, cancel_request_time, &ctx);

        // Persist the status flip first; freeing the window cannot fail.
        reservation.status = ReservationStatus::Cancelled;
        reservation.cancellation_tier = Some(fee.tier);
        reservation.updated_at = Utc::now();
        self.store.update_reservation(reservation.clone()).await?;
        self.index.remove(id).await;

        metrics::counter!(observability::CANCELLATIONS_TOTAL, "tier" => fee.tier.as_label())
            .increment(1);
        tracing::info!(
            reservation_id = %id,
            tier = fee.tier.as_label(),
            fee_minutes = fee.fee_minutes,
            "reservation cancelled"
        );
        self.notify.send(
            reservation.date,
            &ScheduleEvent::Cancelled {
                reservation_id: id,
                date: reservation.date,
                tier: fee.tier,
            },
        );

        Ok(CancellationEvent {
            reservation_id: id,
            cancel_request_time,
            lesson_start: reservation.lesson_start(),
            tier: fee.tier,
            fee_minutes: fee.fee_minutes,
            is_force_majeure,
            same_day_cancel_count_for_student: count,
        })
    }

    pub async fn confirm_reservation(&self, id: Ulid) -> Result<Reservation, SchedulerError> {
        self.set_status(id, ReservationStatus::Confirmed).await
    }

    /// The lesson happened; its window stays on the books.
    pub async fn mark_attended(&self, id: Ulid) -> Result<Reservation, SchedulerError> {
        self.set_status(id, ReservationStatus::Attended).await
    }

    pub async fn mark_no_show(&self, id: Ulid) -> Result<Reservation, SchedulerError> {
        self.set_status(id, ReservationStatus::NoShow).await
    }

    async fn set_status(
        &self,
        id: Ulid,
        to: ReservationStatus,
    ) -> Result<Reservation, SchedulerError> {
        let mut reservation = self
            .store
            .reservation(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))?;
        policy::check_transition(reservation.status, to)?;
        reservation.status = to;
        reservation.updated_at = Utc::now();
        self.store.update_reservation(reservation.clone()).await?;
        Ok(reservation)
    }

    /// CONFIRMED to CONFIRMED move. Re-checks conflicts at the new time under
    /// the day locks, swaps the window, and tags the reservation so a later
    /// student cancellation is halved. The move itself carries no fee.
    pub async fn staff_reschedule(
        &self,
        id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Result<Reservation, SchedulerError> {
        let reservation = self
            .store
            .reservation(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))?;
        if reservation.status != ReservationStatus::Confirmed {
            return Err(SchedulerError::InvalidTransition {
                from: reservation.status,
                to: ReservationStatus::Confirmed,
            });
        }
        let start = time_to_minutes(start_time);
        if start + reservation.duration_minutes as Minutes > DAY_MINUTES {
            return Err(SchedulerError::InvalidRequest("lesson runs past midnight"));
        }

        let mut updated = reservation.clone();
        updated.date = date;
        updated.start_time = start_time;
        updated.after_staff_reschedule = true;
        updated.updated_at = Utc::now();

        self.index.reschedule(&reservation, &updated).await?;
        if let Err(e) = self.store.update_reservation(updated.clone()).await {
            // Swap the window back; the stored row still has the old time.
            if self.index.reschedule(&updated, &reservation).await.is_err() {
                tracing::error!(reservation_id = %id, "window rollback failed after storage error");
            }
            return Err(e);
        }

        let assessment = policy::staff_initiated();
        tracing::info!(
            reservation_id = %id,
            date = %date,
            start = %start_time,
            tier = assessment.tier.as_label(),
            "staff reschedule"
        );
        self.notify.send(
            updated.date,
            &ScheduleEvent::Rescheduled {
                reservation_id: id,
                from_date: reservation.date,
                date: updated.date,
                window: updated.buffered_window(),
            },
        );
        Ok(updated)
    }

    pub async fn create_memo(&self, cmd: NewMemo) -> Result<Memo, SchedulerError> {
        if cmd.content.len() > MAX_MEMO_CONTENT_LEN {
            return Err(SchedulerError::InvalidRequest("memo content too long"));
        }
        let now = Utc::now();
        let memo = Memo {
            id: Ulid::new(),
            date: cmd.date,
            time: cmd.time,
            content: cmd.content,
            memo_type: cmd.memo_type,
            is_public: cmd.is_public,
            author_id: cmd.author_id,
            reservation_id: cmd.reservation_id,
            teacher_id: cmd.teacher_id,
            staff_id: cmd.staff_id,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_memo(memo.clone()).await?;
        Ok(memo)
    }

    pub async fn update_memo(&self, id: Ulid, patch: MemoPatch) -> Result<Memo, SchedulerError> {
        let mut memo = self
            .store
            .memo(id)
            .await?
            .ok_or(SchedulerError::NotFound(id))?;
        if let Some(content) = patch.content {
            if content.len() > MAX_MEMO_CONTENT_LEN {
                return Err(SchedulerError::InvalidRequest("memo content too long"));
            }
            memo.content = content;
        }
        if let Some(time) = patch.time {
            memo.time = time;
        }
        if let Some(memo_type) = patch.memo_type {
            memo.memo_type = memo_type;
        }
        if let Some(is_public) = patch.is_public {
            memo.is_public = is_public;
        }
        memo.updated_at = Utc::now();
        self.store.update_memo(memo.clone()).await?;
        Ok(memo)
    }

    /// Build the requested grid from a snapshot of reservations and memos.
    /// The aggregator never reads the slot index.
    pub async fn calendar(
        &self,
        view_mode: ViewMode,
        anchor_date: NaiveDate,
        teacher_id: Option<Ulid>,
    ) -> Result<Vec<DayCell>, SchedulerError> {
        let mut cells = match view_mode {
            ViewMode::Day => vec![DayCell {
                date: anchor_date,
                in_month: true,
                items: Vec::new(),
            }],
            ViewMode::Week => calendar::week_grid(anchor_date),
            ViewMode::Month => calendar::month_grid(anchor_date.year(), anchor_date.month())
                .ok_or(SchedulerError::InvalidRequest("invalid anchor month"))?,
        };
        let from = cells[0].date;
        let to = cells[cells.len() - 1].date;
        debug_assert!((to - from).num_days() < MAX_QUERY_WINDOW_DAYS);

        let reservations = self.store.reservations_in_range(from, to).await?;
        let memos = self.store.memos_in_range(from, to).await?;

        let mut items: Vec<CalendarItem> = Vec::new();
        for r in &reservations {
            // A teacher's calendar shows their lessons plus venue-wide ones.
            if let Some(t) = teacher_id
                && !(r.teacher_id == Some(t) || r.teacher_id.is_none())
            {
                continue;
            }
            items.push(CalendarItem::from_reservation(r));
        }
        for m in &memos {
            if let Some(t) = teacher_id
                && !(m.teacher_id == Some(t) || m.is_public)
            {
                continue;
            }
            items.push(CalendarItem::from_memo(m));
        }

        let mut buckets = calendar::group_by_day(&items, from, to);
        for cell in &mut cells {
            if let Some(bucket) = buckets.remove(&cell.date) {
                cell.items = bucket;
            }
        }
        Ok(cells)
    }

    /// Replace the duration policy. Frozen buffers on existing reservations
    /// are untouched by construction; only new bookings see the edit.
    pub async fn set_duration_policy(
        &self,
        entries: Vec<DurationRule>,
    ) -> Result<Vec<DurationRule>, SchedulerError> {
        let policy = DurationPolicy::from_entries(entries)?;
        let sorted = policy.entries().to_vec();
        *self.duration_policy.write().await = policy;
        tracing::info!(entries = sorted.len(), "duration policy replaced");
        Ok(sorted)
    }
}
