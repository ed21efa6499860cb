//! Daily settlement job.
//!
//! Each run, for every challenge still `IN_PROGRESS`:
//!
//! 1. seal every open week whose 7-day slice is over (SUCCESS or FAIL)
//! 2. if the whole duration has elapsed, seal the remaining open weeks,
//!    decide member results, and flip the challenge to `COMPLETED`
//!
//! The status flip is an optimistic check-and-set in the same transaction
//! as the member results, so concurrent or repeated runs settle a
//! challenge at most once. One challenge failing never stops the batch.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::rules::{decide_solo, decide_vs, Standing, TieBreak};
use crate::challenge::{
    week_of_date, Challenge, ChallengeId, ChallengeMode, ChallengeStatus, MemberResult, UserId,
    WeeklyProgress, WeeklyStatus,
};
use crate::clock::Clock;
use crate::error::{DatabaseError, NotFoundError, Result};
use crate::progress::{ProgressStateMachine, Transition};
use crate::storage::Store;

/// Check-and-set attempts per week before a close-out gives up.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Outcome of settling one challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SettlementOutcome {
    Settled {
        challenge_id: ChallengeId,
        results: Vec<(UserId, MemberResult)>,
        /// Only for VS challenges with two or more members.
        decided_by: Option<TieBreak>,
        weeks_closed: usize,
    },
    /// Already `COMPLETED`, here or by a concurrent run.
    AlreadySettled { challenge_id: ChallengeId },
    /// The duration has not elapsed yet.
    NotDue {
        challenge_id: ChallengeId,
        weeks_closed: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementFailure {
    pub challenge_id: ChallengeId,
    pub error: String,
}

/// Summary of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReport {
    pub ran_at: DateTime<Utc>,
    pub settled: Vec<ChallengeId>,
    pub already_settled: Vec<ChallengeId>,
    pub failed: Vec<SettlementFailure>,
    /// Weeks sealed across all challenges, including those settled.
    pub weeks_closed: usize,
}

impl SettlementReport {
    fn new(ran_at: DateTime<Utc>) -> Self {
        Self {
            ran_at,
            settled: Vec::new(),
            already_settled: Vec::new(),
            failed: Vec::new(),
            weeks_closed: 0,
        }
    }

    fn record(&mut self, outcome: &SettlementOutcome) {
        match outcome {
            SettlementOutcome::Settled {
                challenge_id,
                weeks_closed,
                ..
            } => {
                self.settled.push(*challenge_id);
                self.weeks_closed += weeks_closed;
            }
            SettlementOutcome::AlreadySettled { challenge_id } => {
                self.already_settled.push(*challenge_id);
            }
            SettlementOutcome::NotDue { weeks_closed, .. } => {
                self.weeks_closed += weeks_closed;
            }
        }
    }

    /// One-line confirmation.
    pub fn summary(&self) -> String {
        format!(
            "settlement run at {}: {} settled, {} already settled, {} failed, {} weeks closed",
            self.ran_at.to_rfc3339(),
            self.settled.len(),
            self.already_settled.len(),
            self.failed.len(),
            self.weeks_closed
        )
    }
}

pub struct SettlementScheduler {
    store: Arc<dyn Store>,
    machine: Arc<ProgressStateMachine>,
    clock: Arc<dyn Clock>,
    solo_success_ratio: f64,
}

impl SettlementScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        machine: Arc<ProgressStateMachine>,
        clock: Arc<dyn Clock>,
        solo_success_ratio: f64,
    ) -> Self {
        Self {
            store,
            machine,
            clock,
            solo_success_ratio,
        }
    }

    /// Run one batch over every in-progress challenge.
    ///
    /// Errors are collected per challenge; only a failure to list the
    /// challenges at all is reported as a failed run.
    pub fn run_once(&self) -> Result<SettlementReport> {
        let today = self.clock.today();
        let mut report = SettlementReport::new(self.clock.now());

        let challenges = self.store.list_in_progress()?;
        debug!(count = challenges.len(), %today, "settlement batch started");

        for challenge in &challenges {
            match self.process(challenge, today) {
                Ok(outcome) => report.record(&outcome),
                Err(err) => {
                    error!(challenge_id = challenge.id, error = %err, "settlement failed");
                    report.failed.push(SettlementFailure {
                        challenge_id: challenge.id,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            settled = report.settled.len(),
            already_settled = report.already_settled.len(),
            failed = report.failed.len(),
            weeks_closed = report.weeks_closed,
            "settlement batch finished"
        );
        Ok(report)
    }

    /// Operator trigger: run a batch now and return its summary line.
    pub fn force_run(&self) -> Result<String> {
        info!("forced settlement run");
        Ok(self.run_once()?.summary())
    }

    /// Settle a single challenge if it is due.
    pub fn settle_challenge(&self, challenge_id: ChallengeId) -> Result<SettlementOutcome> {
        let challenge = self
            .store
            .find_challenge(challenge_id)?
            .ok_or(NotFoundError::Challenge(challenge_id))?;
        self.process(&challenge, self.clock.today())
    }

    fn process(&self, challenge: &Challenge, today: NaiveDate) -> Result<SettlementOutcome> {
        if challenge.status == ChallengeStatus::Completed {
            return Ok(SettlementOutcome::AlreadySettled {
                challenge_id: challenge.id,
            });
        }
        if !challenge.is_due(today) {
            let weeks_closed = self.close_elapsed_weeks(challenge, today)?;
            return Ok(SettlementOutcome::NotDue {
                challenge_id: challenge.id,
                weeks_closed,
            });
        }
        self.settle(challenge)
    }

    /// Seal open weeks whose slice ended before `today`.
    pub fn close_elapsed_weeks(&self, challenge: &Challenge, today: NaiveDate) -> Result<usize> {
        let Some(today_week) = week_of_date(challenge.started_at, today) else {
            return Ok(0);
        };
        self.close_weeks(challenge, |week| week < today_week)
    }

    fn close_weeks(&self, challenge: &Challenge, is_over: impl Fn(u32) -> bool) -> Result<usize> {
        let mut closed = 0;
        for progress in self.store.list_open_progress(challenge.id)? {
            if !is_over(progress.week_number) {
                continue;
            }
            let (user_id, week) = (progress.user_id, progress.week_number);
            if let Some(status) = self.close_week(progress)? {
                debug!(
                    challenge_id = challenge.id,
                    user_id,
                    week,
                    status = status.as_str(),
                    "week closed"
                );
                closed += 1;
            }
        }
        Ok(closed)
    }

    /// Seal one week, re-reading it whenever a concurrent stop lands first.
    ///
    /// Returns the sealed status, or `None` if someone else sealed it.
    fn close_week(&self, mut progress: WeeklyProgress) -> Result<Option<WeeklyStatus>> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let read_elapsed = progress.elapsed_time_seconds;
            let mut sealed = progress.clone();
            let Transition::Sealed(status) = self.machine.decide_on_complete(&mut sealed) else {
                return Ok(None);
            };
            if self.store.commit_progress(&sealed, read_elapsed)? {
                return Ok(Some(status));
            }

            let (challenge_id, user_id, week) =
                (progress.challenge_id, progress.user_id, progress.week_number);
            match self.store.find_progress(challenge_id, user_id, week)? {
                Some(fresh) if !fresh.is_complete => {
                    debug!(challenge_id, user_id, week, attempt, "week changed under close-out; retrying");
                    progress = fresh;
                }
                _ => return Ok(None),
            }
        }
        Err(DatabaseError::Contended("weekly_progress".into()).into())
    }

    fn settle(&self, challenge: &Challenge) -> Result<SettlementOutcome> {
        let weeks_closed = self.close_weeks(challenge, |_| true)?;

        let members = self.store.list_members(challenge.id)?;
        let mut standings = Vec::with_capacity(members.len());
        for member in &members {
            let weeks = self.store.list_progress(challenge.id, member.user_id)?;
            standings.push(Standing::from_progress(member, &weeks));
        }

        let verdict = match challenge.mode {
            ChallengeMode::Vs => decide_vs(&standings),
            ChallengeMode::Solo => None,
        };
        let (results, decided_by) = match verdict {
            Some((results, by)) => (results, Some(by)),
            // SOLO, or a VS challenge whose opponent never joined.
            None => {
                let results = standings
                    .iter()
                    .map(|s| {
                        let result =
                            decide_solo(s, challenge.duration_weeks, self.solo_success_ratio);
                        (s.user_id, result)
                    })
                    .collect();
                (results, None)
            }
        };

        if !self
            .store
            .complete_challenge(challenge.id, &results, self.clock.now())?
        {
            warn!(challenge_id = challenge.id, "challenge settled concurrently");
            return Ok(SettlementOutcome::AlreadySettled {
                challenge_id: challenge.id,
            });
        }

        info!(
            challenge_id = challenge.id,
            mode = challenge.mode.as_str(),
            decided_by = ?decided_by,
            weeks_closed,
            "challenge settled"
        );
        Ok(SettlementOutcome::Settled {
            challenge_id: challenge.id,
            results,
            decided_by,
            weeks_closed,
        })
    }

    /// Run [`run_once`](Self::run_once) on a fixed period, starting now.
    ///
    /// Must be called from within a tokio runtime. Batches run on the
    /// blocking pool and never overlap within one scheduler.
    pub fn spawn(self: Arc<Self>, period: Duration) -> SchedulerHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let scheduler = Arc::clone(&self);
                        match tokio::task::spawn_blocking(move || scheduler.run_once()).await {
                            Ok(Ok(report)) => debug!(summary = %report.summary(), "scheduled run"),
                            Ok(Err(err)) => error!(error = %err, "scheduled settlement run failed"),
                            Err(err) => error!(error = %err, "settlement task panicked"),
                        }
                    }
                    // Also fires when the handle is dropped.
                    _ = stop.changed() => break,
                }
            }
            debug!("settlement scheduler stopped");
        });
        SchedulerHandle { shutdown, task }
    }
}

/// Handle to a spawned scheduler loop.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop after any in-flight batch and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "settlement scheduler exited abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::progress::TargetReached;
    use crate::storage::{ChallengeStore, Database, NewChallenge, ProgressStore};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fixture(today: NaiveDate) -> (Arc<Database>, Arc<ManualClock>, SettlementScheduler) {
        let db = Arc::new(Database::open_memory().unwrap());
        let clock = Arc::new(ManualClock::at_date(today));
        let scheduler = SettlementScheduler::new(
            db.clone(),
            Arc::new(ProgressStateMachine::new(Box::new(TargetReached))),
            clock.clone(),
            0.7,
        );
        (db, clock, scheduler)
    }

    fn solo(db: &Database, weeks: u32) -> Challenge {
        db.create_challenge(&NewChallenge {
            mode: ChallengeMode::Solo,
            started_at: date(2026, 1, 1),
            duration_weeks: weeks,
            host_id: 1,
            member_id: None,
            target_time_seconds: 100,
        })
        .unwrap()
    }

    #[test]
    fn elapsed_weeks_are_closed_before_due() {
        let (db, _clock, scheduler) = fixture(date(2026, 1, 16));
        let challenge = solo(&db, 4);
        let mut week1 = db.find_progress(challenge.id, 1, 1).unwrap().unwrap();
        week1.elapsed_time_seconds = 150;
        assert!(db.commit_progress(&week1, 0).unwrap());

        let outcome = scheduler.settle_challenge(challenge.id).unwrap();
        assert_eq!(
            outcome,
            SettlementOutcome::NotDue {
                challenge_id: challenge.id,
                weeks_closed: 2
            }
        );

        let weeks = db.list_progress(challenge.id, 1).unwrap();
        assert_eq!(weeks[0].weekly_status, WeeklyStatus::Success);
        assert_eq!(weeks[1].weekly_status, WeeklyStatus::Fail);
        // Week 3 is the current week.
        assert!(!weeks[2].is_complete);
    }

    #[test]
    fn due_solo_challenge_is_settled_once() {
        let (db, _clock, scheduler) = fixture(date(2026, 1, 15));
        let challenge = solo(&db, 2);

        let report = scheduler.run_once().unwrap();
        assert_eq!(report.settled, vec![challenge.id]);
        assert_eq!(report.weeks_closed, 2);

        let stored = db.find_challenge(challenge.id).unwrap().unwrap();
        assert_eq!(stored.status, ChallengeStatus::Completed);

        // Gone from the in-progress listing; direct settle is a no-op.
        assert!(scheduler.run_once().unwrap().settled.is_empty());
        assert_eq!(
            scheduler.settle_challenge(challenge.id).unwrap(),
            SettlementOutcome::AlreadySettled {
                challenge_id: challenge.id
            }
        );
    }

    #[test]
    fn force_run_reports_summary() {
        let (db, _clock, scheduler) = fixture(date(2026, 1, 15));
        solo(&db, 2);
        let line = scheduler.force_run().unwrap();
        assert!(line.contains("1 settled"), "{line}");
    }

    #[test]
    fn unknown_challenge_is_not_found() {
        let (_db, _clock, scheduler) = fixture(date(2026, 1, 15));
        let err = scheduler.settle_challenge(404).unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
