//! Weekly progress state machine.
//!
//! ```text
//! PENDING -> SUCCESS   (terminal)
//! PENDING -> FAIL      (terminal)
//! ```
//!
//! Whether a week counts as a success is a product decision, so the
//! threshold is a [`CompletionPolicy`] handed to the machine rather than a
//! formula baked into it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::challenge::{WeeklyProgress, WeeklyStatus};

/// Predicate deciding whether accumulated time satisfies a week's target.
pub trait CompletionPolicy: Send + Sync + fmt::Debug {
    fn is_satisfied(&self, elapsed_secs: u64, target_secs: u64) -> bool;
}

/// `elapsed >= target`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetReached;

impl CompletionPolicy for TargetReached {
    fn is_satisfied(&self, elapsed_secs: u64, target_secs: u64) -> bool {
        elapsed_secs >= target_secs
    }
}

/// `elapsed >= target * min_ratio`.
#[derive(Debug, Clone, Copy)]
pub struct RatioOfTarget {
    pub min_ratio: f64,
}

impl CompletionPolicy for RatioOfTarget {
    fn is_satisfied(&self, elapsed_secs: u64, target_secs: u64) -> bool {
        elapsed_secs as f64 >= target_secs as f64 * self.min_ratio
    }
}

/// Whether the week being evaluated can still accumulate time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeekWindow {
    /// The current week; a short week stays PENDING.
    Open,
    /// The week's slice is over (or the challenge is being settled); the
    /// week must be sealed either way.
    Closed,
}

/// Outcome of evaluating one week.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already sealed before this evaluation; nothing changed.
    Unchanged,
    /// Not yet decided.
    StillPending,
    /// Sealed with the given terminal status.
    Sealed(WeeklyStatus),
}

#[derive(Debug)]
pub struct ProgressStateMachine {
    policy: Box<dyn CompletionPolicy>,
}

impl ProgressStateMachine {
    pub fn new(policy: Box<dyn CompletionPolicy>) -> Self {
        Self { policy }
    }

    /// Decide the week's outcome and seal it when decided.
    ///
    /// A sealed record is never touched again.
    pub fn decide(&self, progress: &mut WeeklyProgress, window: WeekWindow) -> Transition {
        if progress.is_complete {
            return Transition::Unchanged;
        }

        let satisfied = self
            .policy
            .is_satisfied(progress.elapsed_time_seconds, progress.target_time_seconds);

        let status = match (satisfied, window) {
            (true, _) => WeeklyStatus::Success,
            (false, WeekWindow::Closed) => WeeklyStatus::Fail,
            (false, WeekWindow::Open) => return Transition::StillPending,
        };
        Self::seal(progress, status);
        Transition::Sealed(status)
    }

    /// Close out a week: decide SUCCESS or FAIL and mark it complete.
    pub fn decide_on_complete(&self, progress: &mut WeeklyProgress) -> Transition {
        self.decide(progress, WeekWindow::Closed)
    }

    fn seal(progress: &mut WeeklyProgress, status: WeeklyStatus) {
        progress.weekly_status = status;
        progress.is_complete = true;
    }
}

impl Default for ProgressStateMachine {
    fn default() -> Self {
        Self::new(Box::new(TargetReached))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn week(elapsed: u64, target: u64) -> WeeklyProgress {
        WeeklyProgress {
            id: 1,
            challenge_id: 1,
            user_id: 1,
            week_number: 3,
            title: String::new(),
            content: String::new(),
            target_time_seconds: target,
            elapsed_time_seconds: elapsed,
            weekly_status: WeeklyStatus::Pending,
            is_complete: false,
        }
    }

    #[test]
    fn open_week_short_of_target_stays_pending() {
        let machine = ProgressStateMachine::default();
        let mut progress = week(100, 200);
        assert_eq!(machine.decide(&mut progress, WeekWindow::Open), Transition::StillPending);
        assert_eq!(progress.weekly_status, WeeklyStatus::Pending);
        assert!(!progress.is_complete);
    }

    #[test]
    fn reaching_target_seals_success() {
        let machine = ProgressStateMachine::default();
        let mut progress = week(250, 200);
        assert_eq!(
            machine.decide(&mut progress, WeekWindow::Open),
            Transition::Sealed(WeeklyStatus::Success)
        );
        assert!(progress.is_complete);
    }

    #[test]
    fn closed_week_short_of_target_fails() {
        let machine = ProgressStateMachine::default();
        let mut progress = week(10, 200);
        assert_eq!(
            machine.decide_on_complete(&mut progress),
            Transition::Sealed(WeeklyStatus::Fail)
        );
        assert!(progress.is_complete);
    }

    #[test]
    fn sealed_week_is_terminal() {
        let machine = ProgressStateMachine::default();
        let mut progress = week(10, 200);
        machine.decide_on_complete(&mut progress);

        progress.elapsed_time_seconds = 1_000;
        assert_eq!(machine.decide_on_complete(&mut progress), Transition::Unchanged);
        assert_eq!(progress.weekly_status, WeeklyStatus::Fail);
    }

    #[test]
    fn ratio_policy_is_pluggable() {
        let machine = ProgressStateMachine::new(Box::new(RatioOfTarget { min_ratio: 0.5 }));
        let mut progress = week(100, 200);
        assert_eq!(
            machine.decide(&mut progress, WeekWindow::Open),
            Transition::Sealed(WeeklyStatus::Success)
        );
    }
}
