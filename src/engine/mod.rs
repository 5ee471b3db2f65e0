mod availability;
mod conflict;
mod error;
#[cfg(test)]
mod tests;

pub use availability::{
    busy_spans, candidate_starts, first_fit, free_spans, merge_overlapping, subtract_spans,
};
pub use error::SchedulerError;

use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use conflict::{check_no_conflict, in_scope, validate_window};

pub type SharedDaySchedule = Arc<RwLock<DaySchedule>>;

/// One occupied slot: the raw lesson plus its buffer-expanded window, tagged
/// with the conflict scope it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEntry {
    pub reservation_id: Ulid,
    pub resource: ResourceKey,
    pub lesson: MinuteSpan,
    pub window: MinuteSpan,
}

/// All occupied windows of a single calendar date, sorted by window start.
#[derive(Debug, Default)]
pub struct DaySchedule {
    entries: Vec<SlotEntry>,
}

impl DaySchedule {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Insert maintaining sort order by window start.
    pub fn insert_entry(&mut self, entry: SlotEntry) {
        let pos = self
            .entries
            .binary_search_by_key(&entry.window.start, |e| e.window.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    pub fn remove_entry(&mut self, reservation_id: Ulid) -> Option<SlotEntry> {
        if let Some(pos) = self.entries.iter().position(|e| e.reservation_id == reservation_id) {
            Some(self.entries.remove(pos))
        } else {
            None
        }
    }

    /// Entries whose window overlaps the query. Binary search skips everything
    /// starting at or after `query.end`.
    pub fn overlapping(&self, query: &MinuteSpan) -> impl Iterator<Item = &SlotEntry> {
        let right_bound = self.entries.partition_point(|e| e.window.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.window.end > query.start)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A booked interval as reported to callers, ordered by start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedWindow {
    pub reservation_id: Ulid,
    pub teacher_id: Option<Ulid>,
    pub lesson: MinuteSpan,
    pub window: MinuteSpan,
}

/// Tracks occupied, buffer-expanded windows per calendar date and arbitrates
/// conflicts. The partition is the date: each date owns one `RwLock`, so
/// check-then-record is a single critical section and a venue-wide insert can
/// atomically see every teacher's windows. Writes to different dates never
/// contend; reads share the lock.
pub struct SlotIndex {
    days: DashMap<NaiveDate, SharedDaySchedule>,
    /// Reverse lookup for removal: reservation id to its date partition.
    reservation_to_date: DashMap<Ulid, NaiveDate>,
}

impl Default for SlotIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotIndex {
    pub fn new() -> Self {
        Self {
            days: DashMap::new(),
            reservation_to_date: DashMap::new(),
        }
    }

    fn day_for(&self, date: NaiveDate) -> SharedDaySchedule {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DaySchedule::new())))
            .value()
            .clone()
    }

    fn read_day(&self, date: NaiveDate) -> Option<SharedDaySchedule> {
        self.days.get(&date).map(|e| e.value().clone())
    }

    /// Atomic check-then-record. Fails with `Conflict` when the reservation's
    /// buffer-expanded window overlaps any occupied window in its scope; a
    /// losing insert never retries or queues.
    pub async fn insert(&self, reservation: &Reservation) -> Result<(), SchedulerError> {
        let window = reservation.buffered_window();
        validate_window(&window)?;

        let day = self.day_for(reservation.date);
        let mut guard = day.write().await;
        check_no_conflict(&guard, reservation.resource_key(), &window)?;
        guard.insert_entry(SlotEntry {
            reservation_id: reservation.id,
            resource: reservation.resource_key(),
            lesson: reservation.lesson_span(),
            window,
        });
        self.reservation_to_date.insert(reservation.id, reservation.date);
        Ok(())
    }

    /// Delete a reservation's window. No-op (returns false) if absent.
    pub async fn remove(&self, reservation_id: Ulid) -> bool {
        let Some((_, date)) = self.reservation_to_date.remove(&reservation_id) else {
            return false;
        };
        if let Some(day) = self.read_day(date) {
            let mut guard = day.write().await;
            return guard.remove_entry(reservation_id).is_some();
        }
        false
    }

    /// Move a reservation's window. Both days are locked (in date order when
    /// they differ) so the swap is atomic: on conflict at the new time the old
    /// window is still in place and nothing changed.
    pub async fn reschedule(
        &self,
        old: &Reservation,
        new: &Reservation,
    ) -> Result<(), SchedulerError> {
        debug_assert_eq!(old.id, new.id);
        let window = new.buffered_window();
        validate_window(&window)?;

        let entry = SlotEntry {
            reservation_id: new.id,
            resource: new.resource_key(),
            lesson: new.lesson_span(),
            window,
        };

        if old.date == new.date {
            let day = self.day_for(new.date);
            let mut guard = day.write().await;
            let removed = guard.remove_entry(old.id);
            match check_no_conflict(&guard, new.resource_key(), &window) {
                Ok(()) => {
                    guard.insert_entry(entry);
                    self.reservation_to_date.insert(new.id, new.date);
                    Ok(())
                }
                Err(e) => {
                    if let Some(prev) = removed {
                        guard.insert_entry(prev);
                    }
                    Err(e)
                }
            }
        } else {
            // Lock both partitions in date order so concurrent reschedules
            // cannot deadlock.
            let (first, second) = if old.date < new.date {
                (old.date, new.date)
            } else {
                (new.date, old.date)
            };
            let first_day = self.day_for(first);
            let second_day = self.day_for(second);
            let mut first_guard = first_day.write().await;
            let mut second_guard = second_day.write().await;
            let (old_guard, new_guard) = if old.date == first {
                (&mut first_guard, &mut second_guard)
            } else {
                (&mut second_guard, &mut first_guard)
            };

            let removed = old_guard.remove_entry(old.id);
            match check_no_conflict(new_guard, new.resource_key(), &window) {
                Ok(()) => {
                    new_guard.insert_entry(entry);
                    self.reservation_to_date.insert(new.id, new.date);
                    Ok(())
                }
                Err(e) => {
                    if let Some(prev) = removed {
                        old_guard.insert_entry(prev);
                    }
                    Err(e)
                }
            }
        }
    }

    /// Occupied windows visible to the given scope, ordered by start time.
    pub async fn booked_windows(
        &self,
        date: NaiveDate,
        teacher_id: Option<Ulid>,
    ) -> Vec<BookedWindow> {
        let Some(day) = self.read_day(date) else {
            return Vec::new();
        };
        let guard = day.read().await;
        let scope = ResourceKey::from_teacher(teacher_id);
        guard
            .entries
            .iter()
            .filter(|e| in_scope(e.resource, scope))
            .map(|e| BookedWindow {
                reservation_id: e.reservation_id,
                teacher_id: match e.resource {
                    ResourceKey::Teacher(id) => Some(id),
                    ResourceKey::Venue => None,
                },
                lesson: e.lesson,
                window: e.window,
            })
            .collect()
    }

    /// Pure overlap probe, no mutation.
    pub async fn is_available(
        &self,
        date: NaiveDate,
        span: MinuteSpan,
        teacher_id: Option<Ulid>,
    ) -> bool {
        let Some(day) = self.read_day(date) else {
            return true;
        };
        let guard = day.read().await;
        let scope = ResourceKey::from_teacher(teacher_id);
        !guard
            .overlapping(&span)
            .any(|e| in_scope(e.resource, scope))
    }

    /// Candidate start times for a lesson across the whole day, ascending.
    pub async fn list_slots(
        &self,
        date: NaiveDate,
        teacher_id: Option<Ulid>,
        duration_minutes: u32,
        buffer_minutes: u32,
        granularity_minutes: u32,
    ) -> Vec<Minutes> {
        let scope = ResourceKey::from_teacher(teacher_id);
        match self.read_day(date) {
            Some(day) => {
                let guard = day.read().await;
                candidate_starts(&guard, scope, duration_minutes, buffer_minutes, granularity_minutes, 0)
            }
            None => candidate_starts(
                &DaySchedule::new(),
                scope,
                duration_minutes,
                buffer_minutes,
                granularity_minutes,
                0,
            ),
        }
    }

    /// First free candidate on or after `from`, walking the five-minute grid.
    pub async fn first_slot_on_or_after(
        &self,
        date: NaiveDate,
        teacher_id: Option<Ulid>,
        duration_minutes: u32,
        buffer_minutes: u32,
        from: Minutes,
    ) -> Result<Minutes, SchedulerError> {
        let scope = ResourceKey::from_teacher(teacher_id);
        let found = match self.read_day(date) {
            Some(day) => {
                let guard = day.read().await;
                first_fit(&guard, scope, duration_minutes, buffer_minutes, from)
            }
            None => first_fit(&DaySchedule::new(), scope, duration_minutes, buffer_minutes, from),
        };
        found.ok_or(SchedulerError::SlotsExhausted)
    }

    /// Merged free sub-spans of `query` for the scope.
    pub async fn free_windows(
        &self,
        date: NaiveDate,
        teacher_id: Option<Ulid>,
        query: MinuteSpan,
    ) -> Vec<MinuteSpan> {
        let scope = ResourceKey::from_teacher(teacher_id);
        match self.read_day(date) {
            Some(day) => {
                let guard = day.read().await;
                free_spans(&guard, scope, &query)
            }
            None => vec![query],
        }
    }
}
