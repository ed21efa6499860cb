//! Week numbering.
//!
//! Every caller (seeding, timer start/stop, status read-model, week
//! close-out, settlement) goes through [`current_week`], so a challenge's
//! active week is computed one way only.

use chrono::{Duration, NaiveDate};

/// `clamp(floor(days_since_start / 7) + 1, 1, duration_weeks)`.
///
/// Dates before the start resolve to week 1. A zero-week duration is
/// treated as a single week.
pub fn current_week(started_at: NaiveDate, today: NaiveDate, duration_weeks: u32) -> u32 {
    let last = i64::from(duration_weeks.max(1));
    let days = (today - started_at).num_days();
    let week = days.div_euclid(7) + 1;
    // Bounded by `last`, which came from a u32.
    week.clamp(1, last) as u32
}

/// Unclamped week a date falls in, or `None` before the start.
///
/// Used to tell whether a week's 7-day slice is already over.
pub fn week_of_date(started_at: NaiveDate, date: NaiveDate) -> Option<u32> {
    let days = (date - started_at).num_days();
    if days < 0 {
        return None;
    }
    u32::try_from(days / 7 + 1).ok()
}

/// First day after the final week.
pub fn end_date(started_at: NaiveDate, duration_weeks: u32) -> NaiveDate {
    started_at + Duration::weeks(i64::from(duration_weeks))
}
