use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use dashmap::DashMap;
use ulid::Ulid;

use crate::engine::SchedulerError;
use crate::model::{Memo, Reservation, ReservationStatus};
use crate::policy::CancellationTier;

/// The persistence collaborator behind the core. Implementations live at the
/// storage boundary; their failures surface as opaque `Storage` errors and the
/// core never retries them.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), SchedulerError>;
    /// Replace a stored reservation. `NotFound` when the id is unknown.
    async fn update_reservation(&self, reservation: Reservation) -> Result<(), SchedulerError>;
    async fn reservation(&self, id: Ulid) -> Result<Option<Reservation>, SchedulerError>;
    /// Snapshot of reservations with dates in the inclusive range.
    async fn reservations_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, SchedulerError>;
    /// How many same-day-tier cancellations the student already has for
    /// lessons in the calendar month of `anchor`.
    async fn same_day_cancellations_in_month(
        &self,
        student_id: Ulid,
        anchor: NaiveDate,
    ) -> Result<u32, SchedulerError>;

    async fn insert_memo(&self, memo: Memo) -> Result<(), SchedulerError>;
    async fn update_memo(&self, memo: Memo) -> Result<(), SchedulerError>;
    async fn memo(&self, id: Ulid) -> Result<Option<Memo>, SchedulerError>;
    async fn memos_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Memo>, SchedulerError>;
}

/// In-memory store used by the binary and the test suite.
pub struct MemoryStore {
    reservations: DashMap<Ulid, Reservation>,
    memos: DashMap<Ulid, Memo>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            reservations: DashMap::new(),
            memos: DashMap::new(),
        }
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn insert_reservation(&self, reservation: Reservation) -> Result<(), SchedulerError> {
        self.reservations.insert(reservation.id, reservation);
        Ok(())
    }

    async fn update_reservation(&self, reservation: Reservation) -> Result<(), SchedulerError> {
        if !self.reservations.contains_key(&reservation.id) {
            return Err(SchedulerError::NotFound(reservation.id));
        }
        self.reservations.insert(reservation.id, reservation);
        Ok(())
    }

    async fn reservation(&self, id: Ulid) -> Result<Option<Reservation>, SchedulerError> {
        Ok(self.reservations.get(&id).map(|e| e.value().clone()))
    }

    async fn reservations_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, SchedulerError> {
        Ok(self
            .reservations
            .iter()
            .filter(|e| e.value().date >= from && e.value().date <= to)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn same_day_cancellations_in_month(
        &self,
        student_id: Ulid,
        anchor: NaiveDate,
    ) -> Result<u32, SchedulerError> {
        let count = self
            .reservations
            .iter()
            .filter(|e| {
                let r = e.value();
                r.student_id == student_id
                    && r.status == ReservationStatus::Cancelled
                    && matches!(
                        r.cancellation_tier,
                        Some(CancellationTier::SameDay | CancellationTier::SameDayRepeated)
                    )
                    && r.date.year() == anchor.year()
                    && r.date.month() == anchor.month()
            })
            .count();
        Ok(count as u32)
    }

    async fn insert_memo(&self, memo: Memo) -> Result<(), SchedulerError> {
        self.memos.insert(memo.id, memo);
        Ok(())
    }

    async fn update_memo(&self, memo: Memo) -> Result<(), SchedulerError> {
        if !self.memos.contains_key(&memo.id) {
            return Err(SchedulerError::NotFound(memo.id));
        }
        self.memos.insert(memo.id, memo);
        Ok(())
    }

    async fn memo(&self, id: Ulid) -> Result<Option<Memo>, SchedulerError> {
        Ok(self.memos.get(&id).map(|e| e.value().clone()))
    }

    async fn memos_in_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Memo>, SchedulerError> {
        Ok(self
            .memos
            .iter()
            .filter(|e| e.value().date >= from && e.value().date <= to)
            .map(|e| e.value().clone())
            .collect())
    }
}
