use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::MinuteSpan;
use crate::policy::CancellationTier;

const CHANNEL_CAPACITY: usize = 256;

/// Schedule change pushed to watching staff clients so open calendars refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScheduleEvent {
    Booked {
        reservation_id: Ulid,
        date: NaiveDate,
        window: MinuteSpan,
    },
    Cancelled {
        reservation_id: Ulid,
        date: NaiveDate,
        tier: CancellationTier,
    },
    Rescheduled {
        reservation_id: Ulid,
        from_date: NaiveDate,
        date: NaiveDate,
        window: MinuteSpan,
    },
}

/// Broadcast hub, one channel per calendar date.
pub struct NotifyHub {
    channels: DashMap<NaiveDate, broadcast::Sender<ScheduleEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to changes for a date. Creates the channel if needed.
    pub fn subscribe(&self, date: NaiveDate) -> broadcast::Receiver<ScheduleEvent> {
        let sender = self
            .channels
            .entry(date)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, date: NaiveDate, event: &ScheduleEvent) {
        if let Some(sender) = self.channels.get(&date) {
            let _ = sender.send(event.clone());
        }
    }
}
