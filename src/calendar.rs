use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{Location, Memo, MemoType, Reservation, ReservationStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Day,
    Week,
    Month,
}

/// One display item in a day bucket. Flattened from the snapshot the caller
/// hands in; the aggregator never touches the slot index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalendarItem {
    Reservation {
        id: Ulid,
        student_id: Ulid,
        teacher_id: Option<Ulid>,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: u32,
        status: ReservationStatus,
        location: Location,
    },
    Memo {
        id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
        memo_type: MemoType,
        content: String,
        is_public: bool,
    },
}

impl CalendarItem {
    pub fn from_reservation(r: &Reservation) -> Self {
        CalendarItem::Reservation {
            id: r.id,
            student_id: r.student_id,
            teacher_id: r.teacher_id,
            date: r.date,
            start_time: r.start_time,
            duration_minutes: r.duration_minutes,
            status: r.status,
            location: r.location,
        }
    }

    pub fn from_memo(m: &Memo) -> Self {
        CalendarItem::Memo {
            id: m.id,
            date: m.date,
            time: m.time,
            memo_type: m.memo_type,
            content: m.content.clone(),
            is_public: m.is_public,
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            CalendarItem::Reservation { date, .. } | CalendarItem::Memo { date, .. } => *date,
        }
    }

    pub fn time_of_day(&self) -> NaiveTime {
        match self {
            CalendarItem::Reservation { start_time, .. } => *start_time,
            CalendarItem::Memo { time, .. } => *time,
        }
    }

    /// Reservations sort before memos at the same time.
    fn kind_rank(&self) -> u8 {
        match self {
            CalendarItem::Reservation { .. } => 0,
            CalendarItem::Memo { .. } => 1,
        }
    }

    fn sort_id(&self) -> Ulid {
        match self {
            CalendarItem::Reservation { id, .. } | CalendarItem::Memo { id, .. } => *id,
        }
    }
}

/// Fixed, deterministic day-bucket order: ascending time of day, reservations
/// before memos on ties, then id. Never insertion order.
pub fn sort_day_bucket(items: &mut [CalendarItem]) {
    items.sort_by_key(|i| (i.time_of_day(), i.kind_rank(), i.sort_id()));
}

/// Bucket items per calendar date over the inclusive range, each bucket
/// time-sorted. Items outside the range are dropped.
pub fn group_by_day(
    items: &[CalendarItem],
    from: NaiveDate,
    to: NaiveDate,
) -> BTreeMap<NaiveDate, Vec<CalendarItem>> {
    let mut buckets: BTreeMap<NaiveDate, Vec<CalendarItem>> = BTreeMap::new();
    for item in items {
        let date = item.date();
        if date < from || date > to {
            continue;
        }
        buckets.entry(date).or_default().push(item.clone());
    }
    for bucket in buckets.values_mut() {
        sort_day_bucket(bucket);
    }
    buckets
}

/// One cell of a calendar grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayCell {
    pub date: NaiveDate,
    /// False on the leading/trailing days borrowed from adjacent months.
    pub in_month: bool,
    pub items: Vec<CalendarItem>,
}

pub fn monday_on_or_before(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Whether two dates share a Monday-first calendar week.
pub fn same_iso_week(a: NaiveDate, b: NaiveDate) -> bool {
    monday_on_or_before(a) == monday_on_or_before(b)
}

/// The month view: always exactly 42 cells, Monday-first, leading and
/// trailing days borrowed from the adjacent months. None for an invalid month.
pub fn month_grid(year: i32, month: u32) -> Option<Vec<DayCell>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let start = monday_on_or_before(first);
    let cells = (0..42)
        .map(|i| {
            let date = start + Duration::days(i);
            DayCell {
                date,
                in_month: date.year() == year && date.month() == month,
                items: Vec::new(),
            }
        })
        .collect();
    Some(cells)
}

/// The week view: 7 cells, Monday through Sunday, containing `anchor`.
/// `in_month` is relative to the anchor's month.
pub fn week_grid(anchor: NaiveDate) -> Vec<DayCell> {
    let start = monday_on_or_before(anchor);
    (0..7)
        .map(|i| {
            let date = start + Duration::days(i);
            DayCell {
                date,
                in_month: date.year() == anchor.year() && date.month() == anchor.month(),
                items: Vec::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn memo_item(date: NaiveDate, time: NaiveTime) -> CalendarItem {
        CalendarItem::Memo {
            id: Ulid::new(),
            date,
            time,
            memo_type: MemoType::Staff,
            content: "restock rosin".into(),
            is_public: true,
        }
    }

    fn reservation_item(date: NaiveDate, time: NaiveTime) -> CalendarItem {
        CalendarItem::Reservation {
            id: Ulid::new(),
            student_id: Ulid::new(),
            teacher_id: None,
            date,
            start_time: time,
            duration_minutes: 60,
            status: ReservationStatus::Confirmed,
            location: Location::Offline,
        }
    }

    #[test]
    fn month_grid_is_always_42_cells() {
        for (year, month) in [(2025, 11), (2026, 2), (2024, 2), (2026, 6), (2025, 12)] {
            let grid = month_grid(year, month).unwrap();
            assert_eq!(grid.len(), 42, "{year}-{month}");
        }
    }

    #[test]
    fn november_2025_leads_with_october_monday() {
        // November 2025 starts on a Saturday; the leading Monday is Oct 27.
        let grid = month_grid(2025, 11).unwrap();
        assert_eq!(grid[0].date, d(2025, 10, 27));
        assert!(!grid[0].in_month);
        assert_eq!(grid[5].date, d(2025, 11, 1));
        assert!(grid[5].in_month);
        assert_eq!(grid.iter().filter(|c| c.in_month).count(), 30);
    }

    #[test]
    fn month_grid_monday_first_everywhere() {
        let grid = month_grid(2026, 6).unwrap();
        assert_eq!(grid[0].date.weekday(), Weekday::Mon);
        assert_eq!(grid[0].date, d(2026, 6, 1)); // June 2026 starts on Monday
        assert!(grid[41].date.month() == 7 && !grid[41].in_month);
    }

    #[test]
    fn month_grid_rejects_invalid_month() {
        assert!(month_grid(2025, 13).is_none());
        assert!(month_grid(2025, 0).is_none());
    }

    #[test]
    fn week_grid_monday_through_sunday() {
        // Anchor on a Wednesday.
        let grid = week_grid(d(2025, 11, 12));
        assert_eq!(grid.len(), 7);
        assert_eq!(grid[0].date, d(2025, 11, 10));
        assert_eq!(grid[6].date, d(2025, 11, 16));
        assert_eq!(grid[0].date.weekday(), Weekday::Mon);
        assert_eq!(grid[6].date.weekday(), Weekday::Sun);
    }

    #[test]
    fn week_grid_containing_anchor_on_sunday() {
        let grid = week_grid(d(2025, 11, 16));
        assert_eq!(grid[0].date, d(2025, 11, 10));
        assert!(grid.iter().any(|c| c.date == d(2025, 11, 16)));
    }

    #[test]
    fn week_grid_flags_month_spill() {
        // Week of 2025-12-29 spills into January 2026.
        let grid = week_grid(d(2025, 12, 31));
        assert_eq!(grid[0].date, d(2025, 12, 29));
        assert!(grid[6].date.month() == 1 && !grid[6].in_month);
    }

    #[test]
    fn same_week_is_monday_first() {
        assert!(same_iso_week(d(2025, 11, 10), d(2025, 11, 16)));
        assert!(!same_iso_week(d(2025, 11, 9), d(2025, 11, 10))); // Sunday vs Monday
        assert!(!same_iso_week(d(2025, 11, 16), d(2025, 11, 17)));
    }

    #[test]
    fn group_by_day_drops_out_of_range() {
        let items = vec![
            reservation_item(d(2025, 11, 10), t(10, 0)),
            reservation_item(d(2025, 11, 20), t(10, 0)),
        ];
        let buckets = group_by_day(&items, d(2025, 11, 10), d(2025, 11, 16));
        assert_eq!(buckets.len(), 1);
        assert!(buckets.contains_key(&d(2025, 11, 10)));
    }

    #[test]
    fn day_bucket_sorts_by_time() {
        let mut items = vec![
            reservation_item(d(2025, 11, 10), t(15, 0)),
            memo_item(d(2025, 11, 10), t(9, 30)),
            reservation_item(d(2025, 11, 10), t(10, 0)),
        ];
        sort_day_bucket(&mut items);
        assert_eq!(items[0].time_of_day(), t(9, 30));
        assert_eq!(items[1].time_of_day(), t(10, 0));
        assert_eq!(items[2].time_of_day(), t(15, 0));
    }

    #[test]
    fn tied_times_put_reservations_before_memos() {
        let memo = memo_item(d(2025, 11, 10), t(10, 0));
        let lesson = reservation_item(d(2025, 11, 10), t(10, 0));
        let mut items = vec![memo.clone(), lesson.clone()];
        sort_day_bucket(&mut items);
        assert_eq!(items[0], lesson);
        assert_eq!(items[1], memo);
    }

    #[test]
    fn fully_tied_items_order_by_id() {
        let a = memo_item(d(2025, 11, 10), t(10, 0));
        let b = memo_item(d(2025, 11, 10), t(10, 0));
        let mut one = vec![a.clone(), b.clone()];
        let mut two = vec![b, a];
        sort_day_bucket(&mut one);
        sort_day_bucket(&mut two);
        assert_eq!(one, two); // independent of insertion order
    }
}
