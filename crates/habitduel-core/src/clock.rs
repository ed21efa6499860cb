//! Time source abstraction.
//!
//! Production code injects [`SystemClock`]. Tests inject [`ManualClock`] so
//! elapsed time and week numbers are deterministic.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::fmt;
use std::sync::Mutex;

pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock instant.
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date, used for week numbering and settlement.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Midnight UTC of the given date.
    pub fn at_date(date: NaiveDate) -> Self {
        Self::new(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.lock();
        *guard += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned lock still holds a valid timestamp.
        self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at_date(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        let start = clock.now();
        clock.advance(Duration::seconds(90));
        assert_eq!((clock.now() - start).num_seconds(), 90);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());

        clock.advance(Duration::days(9));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 1, 10).unwrap());
    }
}
