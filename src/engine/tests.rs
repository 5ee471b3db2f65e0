use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use super::*;
use crate::model::sample_reservation;

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, d).unwrap()
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn reservation_at(d: u32, h: u32, m: u32, duration: u32, buffer: u32) -> Reservation {
    let mut r = sample_reservation(time(h, m), duration, buffer);
    r.date = date(d);
    r
}

#[tokio::test]
async fn insert_then_probe_then_remove_round_trip() {
    let index = SlotIndex::new();
    let r = reservation_at(10, 14, 0, 60, 10);
    index.insert(&r).await.unwrap();

    // Any probe overlapping the buffered window [13:50, 15:10) is busy.
    assert!(!index.is_available(r.date, MinuteSpan::new(830, 900), None).await);
    assert!(!index.is_available(r.date, MinuteSpan::new(900, 910), None).await);
    // Probes strictly outside are free.
    assert!(index.is_available(r.date, MinuteSpan::new(800, 830), None).await);
    assert!(index.is_available(r.date, MinuteSpan::new(910, 970), None).await);

    assert!(index.remove(r.id).await);
    assert!(index.is_available(r.date, MinuteSpan::new(830, 900), None).await);
}

#[tokio::test]
async fn remove_absent_is_noop() {
    let index = SlotIndex::new();
    assert!(!index.remove(Ulid::new()).await);
}

#[tokio::test]
async fn conflicting_insert_rejected() {
    let index = SlotIndex::new();
    let first = reservation_at(10, 10, 0, 60, 10);
    index.insert(&first).await.unwrap();

    // 11:05 start reaches back into the first booking's buffer.
    let second = reservation_at(10, 11, 5, 60, 10);
    let result = index.insert(&second).await;
    assert_eq!(result, Err(SchedulerError::Conflict(first.id)));

    // 11:20 leaves the buffers clear on both sides.
    let third = reservation_at(10, 11, 20, 60, 10);
    index.insert(&third).await.unwrap();
}

#[tokio::test]
async fn different_teachers_do_not_conflict() {
    let index = SlotIndex::new();
    let mut a = reservation_at(10, 10, 0, 60, 10);
    a.teacher_id = Some(Ulid::new());
    let mut b = reservation_at(10, 10, 0, 60, 10);
    b.teacher_id = Some(Ulid::new());

    index.insert(&a).await.unwrap();
    index.insert(&b).await.unwrap();
}

#[tokio::test]
async fn venue_booking_blocks_every_teacher() {
    let index = SlotIndex::new();
    let venue = reservation_at(10, 10, 0, 60, 10);
    index.insert(&venue).await.unwrap();

    let mut teacher = reservation_at(10, 10, 30, 60, 10);
    teacher.teacher_id = Some(Ulid::new());
    let result = index.insert(&teacher).await;
    assert_eq!(result, Err(SchedulerError::Conflict(venue.id)));
}

#[tokio::test]
async fn venue_probe_sees_teacher_bookings() {
    let index = SlotIndex::new();
    let mut teacher = reservation_at(10, 10, 0, 60, 10);
    teacher.teacher_id = Some(Ulid::new());
    index.insert(&teacher).await.unwrap();

    let venue = reservation_at(10, 10, 30, 60, 10);
    let result = index.insert(&venue).await;
    assert_eq!(result, Err(SchedulerError::Conflict(teacher.id)));
}

#[tokio::test]
async fn different_dates_never_conflict() {
    let index = SlotIndex::new();
    let a = reservation_at(10, 10, 0, 60, 10);
    let b = reservation_at(11, 10, 0, 60, 10);
    index.insert(&a).await.unwrap();
    index.insert(&b).await.unwrap();
}

#[tokio::test]
async fn concurrent_inserts_one_winner() {
    // Two clients race for overlapping windows; exactly one insert may win.
    let index = Arc::new(SlotIndex::new());
    for _ in 0..50 {
        let a = reservation_at(10, 10, 0, 60, 10);
        let b = reservation_at(10, 10, 30, 60, 10);
        let ia = index.clone();
        let ib = index.clone();
        let ra = a.clone();
        let rb = b.clone();
        let (res_a, res_b) = tokio::join!(
            tokio::spawn(async move { ia.insert(&ra).await }),
            tokio::spawn(async move { ib.insert(&rb).await }),
        );
        let ok_a = res_a.unwrap().is_ok();
        let ok_b = res_b.unwrap().is_ok();
        assert!(ok_a ^ ok_b, "exactly one concurrent insert must win");
        // Reset for the next round.
        index.remove(a.id).await;
        index.remove(b.id).await;
    }
}

#[tokio::test]
async fn booked_windows_ordered_by_start() {
    let index = SlotIndex::new();
    let late = reservation_at(10, 15, 0, 60, 10);
    let early = reservation_at(10, 9, 0, 60, 10);
    let mid = reservation_at(10, 12, 0, 60, 10);
    index.insert(&late).await.unwrap();
    index.insert(&early).await.unwrap();
    index.insert(&mid).await.unwrap();

    let windows = index.booked_windows(date(10), None).await;
    assert_eq!(windows.len(), 3);
    assert_eq!(windows[0].reservation_id, early.id);
    assert_eq!(windows[1].reservation_id, mid.id);
    assert_eq!(windows[2].reservation_id, late.id);
}

#[tokio::test]
async fn booked_windows_teacher_scope_filters() {
    let index = SlotIndex::new();
    let t = Ulid::new();
    let mut mine = reservation_at(10, 9, 0, 60, 10);
    mine.teacher_id = Some(t);
    let mut other = reservation_at(10, 12, 0, 60, 10);
    other.teacher_id = Some(Ulid::new());
    let venue = reservation_at(10, 15, 0, 60, 10);
    index.insert(&mine).await.unwrap();
    index.insert(&other).await.unwrap();
    index.insert(&venue).await.unwrap();

    let windows = index.booked_windows(date(10), Some(t)).await;
    let ids: Vec<Ulid> = windows.iter().map(|w| w.reservation_id).collect();
    assert_eq!(ids, vec![mine.id, venue.id]);
}

#[tokio::test]
async fn reschedule_same_day_swaps_window() {
    let index = SlotIndex::new();
    let mut r = reservation_at(10, 10, 0, 60, 10);
    index.insert(&r).await.unwrap();

    let old = r.clone();
    r.start_time = time(14, 0);
    index.reschedule(&old, &r).await.unwrap();

    assert!(index.is_available(r.date, MinuteSpan::new(600, 660), None).await);
    assert!(!index.is_available(r.date, MinuteSpan::new(840, 900), None).await);
}

#[tokio::test]
async fn reschedule_onto_conflict_restores_old_window() {
    let index = SlotIndex::new();
    let blocker = reservation_at(10, 14, 0, 60, 10);
    index.insert(&blocker).await.unwrap();
    let mut r = reservation_at(10, 10, 0, 60, 10);
    index.insert(&r).await.unwrap();

    let old = r.clone();
    r.start_time = time(14, 30);
    let result = index.reschedule(&old, &r).await;
    assert_eq!(result, Err(SchedulerError::Conflict(blocker.id)));

    // The original window is still occupied.
    assert!(!index.is_available(old.date, MinuteSpan::new(600, 660), None).await);
}

#[tokio::test]
async fn reschedule_across_dates() {
    let index = SlotIndex::new();
    let mut r = reservation_at(10, 10, 0, 60, 10);
    index.insert(&r).await.unwrap();

    let old = r.clone();
    r.date = date(12);
    index.reschedule(&old, &r).await.unwrap();

    assert!(index.is_available(date(10), MinuteSpan::new(600, 660), None).await);
    assert!(!index.is_available(date(12), MinuteSpan::new(600, 660), None).await);

    // Removal follows the reservation to its new date.
    assert!(index.remove(r.id).await);
    assert!(index.is_available(date(12), MinuteSpan::new(600, 660), None).await);
}

#[tokio::test]
async fn overlapping_window_shifted_reschedule_does_not_self_conflict() {
    let index = SlotIndex::new();
    let mut r = reservation_at(10, 10, 0, 60, 10);
    index.insert(&r).await.unwrap();

    // Shift by 30 minutes; the new window overlaps the old one.
    let old = r.clone();
    r.start_time = time(10, 30);
    index.reschedule(&old, &r).await.unwrap();
    assert!(!index.is_available(r.date, MinuteSpan::new(630, 690), None).await);
    assert!(index.is_available(r.date, MinuteSpan::new(580, 590), None).await);
}

#[tokio::test]
async fn list_slots_skips_booked_stretch() {
    let index = SlotIndex::new();
    let r = reservation_at(10, 10, 0, 60, 10);
    index.insert(&r).await.unwrap();

    let slots = index.list_slots(date(10), None, 60, 10, 5).await;
    // Window [09:50, 11:10): no candidate may touch it once buffered again.
    assert!(!slots.contains(&600));
    assert!(!slots.contains(&660));
    assert!(slots.contains(&0));
    assert!(slots.contains(&(23 * 60)));
}

#[tokio::test]
async fn first_slot_exhausted_maps_to_error() {
    let index = SlotIndex::new();
    // Fill the whole day with back to back two-hour blocks.
    for h in (0..24).step_by(2) {
        let mut block = sample_reservation(time(h, 0), 120, 0);
        block.date = date(10);
        index.insert(&block).await.unwrap();
    }
    let result = index.first_slot_on_or_after(date(10), None, 60, 0, 0).await;
    assert_eq!(result, Err(SchedulerError::SlotsExhausted));
}

#[tokio::test]
async fn late_booking_cuts_off_tail_candidates() {
    let index = SlotIndex::new();
    // 22:00-23:00 with 10 minute buffer occupies [21:50, 23:10).
    let r = reservation_at(10, 22, 0, 60, 10);
    index.insert(&r).await.unwrap();

    let slots = index.list_slots(date(10), None, 60, 10, 5).await;
    // Nothing after the booking fits before midnight, so the last candidate
    // is the one whose probe ends exactly at 21:50.
    assert_eq!(slots.last(), Some(&1240));
}
