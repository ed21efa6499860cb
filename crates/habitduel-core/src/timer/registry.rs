//! In-memory store of running timers.
//!
//! Keyed by `(challenge_id, user_id)`. The map is sharded, so mutations of
//! unrelated keys do not serialize behind one lock; each mutation is atomic
//! for its key.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::challenge::{ChallengeId, UserId};
use crate::clock::Clock;
use crate::error::StateConflict;

/// Registry key.
pub type SessionKey = (ChallengeId, UserId);

/// A session removed by [`SessionRegistry::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoppedSession {
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    /// `stopped_at - started_at`, never negative.
    pub elapsed_secs: u64,
}

/// Owned registry of open sessions.
///
/// Constructed once at process start and shared behind an `Arc`.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionKey, DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl SessionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: DashMap::new(),
            clock,
        }
    }

    /// Insert a session only if none exists for the key.
    pub fn start(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> Result<DateTime<Utc>, StateConflict> {
        match self.sessions.entry((challenge_id, user_id)) {
            Entry::Occupied(_) => Err(StateConflict::AlreadyRunning {
                challenge_id,
                user_id,
            }),
            Entry::Vacant(slot) => {
                let now = self.clock.now();
                slot.insert(now);
                debug!(challenge_id, user_id, started_at = %now, "session opened");
                Ok(now)
            }
        }
    }

    /// Remove the session if present and report how long it ran.
    pub fn stop(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> Result<StoppedSession, StateConflict> {
        let (_, started_at) = self
            .sessions
            .remove(&(challenge_id, user_id))
            .ok_or(StateConflict::NotRunning {
                challenge_id,
                user_id,
            })?;
        let stopped_at = self.clock.now();
        let elapsed_secs = u64::try_from((stopped_at - started_at).num_seconds()).unwrap_or(0);
        debug!(challenge_id, user_id, elapsed_secs, "session closed");
        Ok(StoppedSession {
            started_at,
            stopped_at,
            elapsed_secs,
        })
    }

    /// Put a stopped session back with its original start instant.
    ///
    /// Used when the durable write following [`stop`](Self::stop) fails.
    /// Returns `false` if a new session was opened for the key meanwhile.
    pub fn restore(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        started_at: DateTime<Utc>,
    ) -> bool {
        match self.sessions.entry((challenge_id, user_id)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(started_at);
                true
            }
        }
    }

    pub fn is_running(&self, challenge_id: ChallengeId, user_id: UserId) -> bool {
        self.sessions.contains_key(&(challenge_id, user_id))
    }

    /// Start instant of the open session, if any.
    pub fn started_at(&self, challenge_id: ChallengeId, user_id: UserId) -> Option<DateTime<Utc>> {
        self.sessions
            .get(&(challenge_id, user_id))
            .map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, NaiveDate};

    fn registry() -> (Arc<ManualClock>, SessionRegistry) {
        let clock = Arc::new(ManualClock::at_date(
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        ));
        let registry = SessionRegistry::new(clock.clone());
        (clock, registry)
    }

    #[test]
    fn second_start_is_already_running() {
        let (_, registry) = registry();
        registry.start(1, 10).unwrap();
        assert_eq!(
            registry.start(1, 10).unwrap_err(),
            StateConflict::AlreadyRunning {
                challenge_id: 1,
                user_id: 10
            }
        );
        // A different user in the same challenge is independent.
        registry.start(1, 11).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn stop_without_start_is_not_running() {
        let (_, registry) = registry();
        assert_eq!(
            registry.stop(1, 10).unwrap_err(),
            StateConflict::NotRunning {
                challenge_id: 1,
                user_id: 10
            }
        );
    }

    #[test]
    fn stop_reports_elapsed_and_removes() {
        let (clock, registry) = registry();
        let started = registry.start(1, 10).unwrap();
        clock.advance(Duration::seconds(125));
        let stopped = registry.stop(1, 10).unwrap();
        assert_eq!(stopped.started_at, started);
        assert_eq!(stopped.elapsed_secs, 125);
        assert!(!registry.is_running(1, 10));
    }

    #[test]
    fn clock_going_backwards_yields_zero() {
        let (clock, registry) = registry();
        registry.start(1, 10).unwrap();
        clock.advance(Duration::seconds(-30));
        assert_eq!(registry.stop(1, 10).unwrap().elapsed_secs, 0);
    }

    #[test]
    fn restore_keeps_original_start() {
        let (clock, registry) = registry();
        let started = registry.start(1, 10).unwrap();
        clock.advance(Duration::seconds(60));
        let stopped = registry.stop(1, 10).unwrap();

        assert!(registry.restore(1, 10, stopped.started_at));
        assert_eq!(registry.started_at(1, 10), Some(started));
        // Occupied slot is left alone.
        assert!(!registry.restore(1, 10, clock.now()));
    }

    #[test]
    fn concurrent_starts_admit_exactly_one() {
        let (_, registry) = registry();
        let registry = Arc::new(registry);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.start(5, 50).is_ok())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
    }
}
