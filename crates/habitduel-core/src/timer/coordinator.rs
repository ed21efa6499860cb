//! Timer coordinator.
//!
//! Validates a live start/stop against the durable records, drives the
//! [`SessionRegistry`], and accumulates stopped time into the active week.
//!
//! ## Stop path
//!
//! ```text
//! validate -> registry.stop -> accumulate + decide -> commit
//!                                                  \-> (commit failed) registry.restore
//! ```
//!
//! The session counts as stopped only once the durable write commits. A
//! failed commit puts the session back with its original start instant so
//! the interval is not lost.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::registry::{SessionRegistry, StoppedSession};
use crate::challenge::{Challenge, ChallengeId, ChallengeStatus, UserId, WeeklyProgress, WeeklyStatus};
use crate::clock::Clock;
use crate::error::{CoreError, DatabaseError, NotFoundError, Result, StateConflict};
use crate::progress::{ProgressStateMachine, Transition, WeekWindow};
use crate::storage::Store;

/// Result of a successful start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerStarted {
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub week: u32,
    pub started_at: DateTime<Utc>,
}

/// Result of a successful stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerStopped {
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub week: u32,
    /// Length of the interval just stopped.
    pub elapsed_secs: u64,
    /// Week total after this interval.
    pub accumulated_secs: u64,
    pub weekly_status: WeeklyStatus,
    pub is_complete: bool,
}

/// Read-model of one participant's timer in the active week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerStatus {
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub week: u32,
    pub elapsed_time_seconds: u64,
    pub target_time_seconds: u64,
    pub weekly_status: WeeklyStatus,
    pub is_complete: bool,
    pub running_since: Option<DateTime<Utc>>,
}

/// Check-and-set attempts before a stop gives up and restores the session.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

pub struct TimerCoordinator {
    store: Arc<dyn Store>,
    registry: Arc<SessionRegistry>,
    machine: Arc<ProgressStateMachine>,
    clock: Arc<dyn Clock>,
}

impl TimerCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<SessionRegistry>,
        machine: Arc<ProgressStateMachine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            machine,
            clock,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&self, challenge_id: ChallengeId, user_id: UserId) -> Result<TimerStarted> {
        let (challenge, progress) = self.load_active_week(challenge_id, user_id)?;
        Self::ensure_open(&progress)?;
        if challenge.status == ChallengeStatus::Completed {
            return Err(StateConflict::ChallengeClosed(challenge_id).into());
        }

        let started_at = self.registry.start(challenge_id, user_id)?;
        info!(challenge_id, user_id, week = progress.week_number, "timer started");

        Ok(TimerStarted {
            challenge_id,
            user_id,
            week: progress.week_number,
            started_at,
        })
    }

    pub fn stop(&self, challenge_id: ChallengeId, user_id: UserId) -> Result<TimerStopped> {
        let (_, mut progress) = self.load_active_week(challenge_id, user_id)?;
        let stopped = self.registry.stop(challenge_id, user_id)?;

        let mut attempt = 1;
        let transition = loop {
            if progress.is_complete {
                // Closed out while the timer ran; the session ends without credit.
                warn!(
                    challenge_id,
                    user_id,
                    week = progress.week_number,
                    dropped_secs = stopped.elapsed_secs,
                    "stop on a sealed week"
                );
                return Err(Self::already_complete(&progress));
            }

            let read_elapsed = progress.elapsed_time_seconds;
            progress.elapsed_time_seconds = read_elapsed.saturating_add(stopped.elapsed_secs);
            let transition = self.machine.decide(&mut progress, WeekWindow::Open);

            let outcome = self
                .store
                .commit_progress(&progress, read_elapsed)
                .and_then(|committed| {
                    if committed {
                        return Ok(None);
                    }
                    if attempt >= MAX_COMMIT_ATTEMPTS {
                        return Err(DatabaseError::Contended("weekly_progress".into()).into());
                    }
                    // Another writer got in between; start over from the stored row.
                    let week = progress.week_number;
                    self.store
                        .find_progress(challenge_id, user_id, week)?
                        .map(Some)
                        .ok_or_else(|| {
                            NotFoundError::WeeklyProgress {
                                challenge_id,
                                user_id,
                                week,
                            }
                            .into()
                        })
                });

            match outcome {
                Ok(None) => break transition,
                Ok(Some(fresh)) => {
                    debug!(challenge_id, user_id, attempt, "progress changed under stop; retrying");
                    progress = fresh;
                    attempt += 1;
                }
                Err(err) => {
                    self.compensate(challenge_id, user_id, &stopped, &err);
                    return Err(err);
                }
            }
        };

        info!(
            challenge_id,
            user_id,
            week = progress.week_number,
            elapsed_secs = stopped.elapsed_secs,
            accumulated_secs = progress.elapsed_time_seconds,
            sealed = matches!(transition, Transition::Sealed(_)),
            "timer stopped"
        );

        Ok(TimerStopped {
            challenge_id,
            user_id,
            week: progress.week_number,
            elapsed_secs: stopped.elapsed_secs,
            accumulated_secs: progress.elapsed_time_seconds,
            weekly_status: progress.weekly_status,
            is_complete: progress.is_complete,
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn status(&self, challenge_id: ChallengeId, user_id: UserId) -> Result<TimerStatus> {
        let (_, progress) = self.load_active_week(challenge_id, user_id)?;
        Ok(TimerStatus {
            challenge_id,
            user_id,
            week: progress.week_number,
            elapsed_time_seconds: progress.elapsed_time_seconds,
            target_time_seconds: progress.target_time_seconds,
            weekly_status: progress.weekly_status,
            is_complete: progress.is_complete,
            running_since: self.registry.started_at(challenge_id, user_id),
        })
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Challenge lookup, membership check, and the active week's record.
    fn load_active_week(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> Result<(Challenge, WeeklyProgress)> {
        let challenge = self
            .store
            .find_challenge(challenge_id)?
            .ok_or(NotFoundError::Challenge(challenge_id))?;

        if self.store.find_member(challenge_id, user_id)?.is_none() {
            return Err(CoreError::Authorization {
                challenge_id,
                user_id,
            });
        }

        let week = challenge.week_on(self.clock.today());
        let progress = self
            .store
            .find_progress(challenge_id, user_id, week)?
            .ok_or(NotFoundError::WeeklyProgress {
                challenge_id,
                user_id,
                week,
            })?;

        Ok((challenge, progress))
    }

    fn ensure_open(progress: &WeeklyProgress) -> Result<()> {
        if progress.is_complete {
            return Err(Self::already_complete(progress));
        }
        Ok(())
    }

    fn already_complete(progress: &WeeklyProgress) -> CoreError {
        StateConflict::AlreadyComplete {
            challenge_id: progress.challenge_id,
            week: progress.week_number,
        }
        .into()
    }

    fn compensate(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        stopped: &StoppedSession,
        err: &CoreError,
    ) {
        let restored = self
            .registry
            .restore(challenge_id, user_id, stopped.started_at);
        warn!(
            challenge_id,
            user_id,
            error = %err,
            restored,
            "commit failed after stop; session restored"
        );
    }
}
