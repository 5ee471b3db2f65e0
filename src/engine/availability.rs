use crate::model::*;

use super::DaySchedule;
use super::conflict::in_scope;

// ── Free-slot algebra ─────────────────────────────────────────────

/// Occupied windows on the day visible to `scope`, clamped to `query`,
/// merged into disjoint ascending spans.
pub fn busy_spans(day: &DaySchedule, scope: ResourceKey, query: &MinuteSpan) -> Vec<MinuteSpan> {
    let mut busy: Vec<MinuteSpan> = day
        .overlapping(query)
        .filter(|e| in_scope(e.resource, scope))
        .map(|e| {
            MinuteSpan::new(
                e.window.start.max(query.start),
                e.window.end.min(query.end),
            )
        })
        .collect();
    busy.sort_by_key(|s| s.start);
    merge_overlapping(&busy)
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[MinuteSpan]) -> Vec<MinuteSpan> {
    let mut merged: Vec<MinuteSpan> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

pub fn subtract_spans(base: &[MinuteSpan], to_remove: &[MinuteSpan]) -> Vec<MinuteSpan> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(MinuteSpan::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(MinuteSpan::new(current_start, current_end));
        }
    }

    result
}

/// The complement of the busy windows within `query`: merged free sub-spans,
/// ascending.
pub fn free_spans(day: &DaySchedule, scope: ResourceKey, query: &MinuteSpan) -> Vec<MinuteSpan> {
    let busy = busy_spans(day, scope, query);
    subtract_spans(&[*query], &busy)
}

// ── Slot search ───────────────────────────────────────────────────

/// A start candidate is valid when its whole buffer-expanded window sits
/// inside one free span. `free` must be disjoint and ascending.
fn slot_fits(free: &[MinuteSpan], probe: &MinuteSpan) -> bool {
    let idx = free.partition_point(|s| s.start <= probe.start);
    idx > 0 && probe.end <= free[idx - 1].end
}

fn probe_window(start: Minutes, duration: Minutes, buffer: Minutes) -> MinuteSpan {
    MinuteSpan::new((start - buffer).max(0), start + duration + buffer)
}

/// All valid start times for a lesson of `duration_minutes` with
/// `buffer_minutes` on both sides, walking the day at `granularity_minutes`,
/// ascending. Candidates whose raw lesson would run past midnight are never
/// produced. Empty when the day is fully booked.
pub fn candidate_starts(
    day: &DaySchedule,
    scope: ResourceKey,
    duration_minutes: u32,
    buffer_minutes: u32,
    granularity_minutes: u32,
    from: Minutes,
) -> Vec<Minutes> {
    debug_assert!(granularity_minutes > 0);
    let duration = duration_minutes as Minutes;
    let buffer = buffer_minutes as Minutes;
    let granularity = granularity_minutes as Minutes;

    let horizon = MinuteSpan::new(0, DAY_MINUTES + buffer);
    let free = free_spans(day, scope, &horizon);

    let mut out = Vec::new();
    // First grid point at or after `from`.
    let mut start = (from.max(0) + granularity - 1) / granularity * granularity;
    while start + duration <= DAY_MINUTES {
        if slot_fits(&free, &probe_window(start, duration, buffer)) {
            out.push(start);
        }
        start += granularity;
    }
    out
}

/// The five-minute grid walk the booking screen uses when a chosen time got
/// booked out from under the user: hour 0..=23, minute 0,5,...,55, starting at
/// `from`, first free candidate wins. None when the day has no slot left.
pub fn first_fit(
    day: &DaySchedule,
    scope: ResourceKey,
    duration_minutes: u32,
    buffer_minutes: u32,
    from: Minutes,
) -> Option<Minutes> {
    let duration = duration_minutes as Minutes;
    let buffer = buffer_minutes as Minutes;

    let horizon = MinuteSpan::new(0, DAY_MINUTES + buffer);
    let free = free_spans(day, scope, &horizon);

    for hour in 0..24 {
        for minute in (0..60).step_by(5) {
            let start = hour * 60 + minute;
            if start < from || start + duration > DAY_MINUTES {
                continue;
            }
            if slot_fits(&free, &probe_window(start, duration, buffer)) {
                return Some(start);
            }
        }
    }
    None
}
