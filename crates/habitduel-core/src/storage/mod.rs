mod config;
pub mod database;
pub mod migrations;

pub use config::{Config, RealtimeConfig, SettlementConfig, WeeklyConfig, WeeklyPolicyKind};
pub use database::{Database, NewChallenge};

use chrono::{DateTime, Utc};
use std::path::PathBuf;

use crate::challenge::{
    Challenge, ChallengeId, ChallengeMember, MemberResult, UserId, WeeklyProgress,
};
use crate::error::{ConfigError, Result};

/// Challenge lookup and the terminal status transition.
pub trait ChallengeStore: Send + Sync {
    fn find_challenge(&self, id: ChallengeId) -> Result<Option<Challenge>>;

    /// Every challenge still `IN_PROGRESS`, ordered by id.
    fn list_in_progress(&self) -> Result<Vec<Challenge>>;

    /// Optimistic `IN_PROGRESS -> COMPLETED` check-and-set that also writes
    /// each member's result, all in one transaction.
    ///
    /// Returns `false` (and writes nothing) if the challenge was no longer
    /// in progress.
    fn complete_challenge(
        &self,
        id: ChallengeId,
        results: &[(UserId, MemberResult)],
        completed_at: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Membership lookup.
pub trait MemberStore: Send + Sync {
    fn find_member(&self, challenge_id: ChallengeId, user_id: UserId)
        -> Result<Option<ChallengeMember>>;

    fn list_members(&self, challenge_id: ChallengeId) -> Result<Vec<ChallengeMember>>;
}

/// Weekly progress lookup and persistence.
pub trait ProgressStore: Send + Sync {
    fn find_progress(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        week: u32,
    ) -> Result<Option<WeeklyProgress>>;

    /// All weeks of one participant, ordered by week number.
    fn list_progress(&self, challenge_id: ChallengeId, user_id: UserId)
        -> Result<Vec<WeeklyProgress>>;

    /// Weeks of a challenge not yet sealed, ordered by user then week.
    fn list_open_progress(&self, challenge_id: ChallengeId) -> Result<Vec<WeeklyProgress>>;

    /// Persist elapsed time and status of a week that is still open.
    ///
    /// Check-and-set: the write only lands if the stored row is still open
    /// and still holds `read_elapsed`, the value `progress` was computed
    /// from. Returns `false` (and writes nothing) otherwise; the caller
    /// reloads and decides again.
    fn commit_progress(&self, progress: &WeeklyProgress, read_elapsed: u64) -> Result<bool>;
}

/// Union of the collaborators the coordinator and scheduler depend on.
pub trait Store: ChallengeStore + MemberStore + ProgressStore {}

impl<T: ChallengeStore + MemberStore + ProgressStore> Store for T {}

/// Returns `~/.config/habitduel[-dev]/` based on HABITDUEL_ENV.
///
/// Set HABITDUEL_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("HABITDUEL_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("habitduel-dev")
    } else {
        base_dir.join("habitduel")
    };

    std::fs::create_dir_all(&dir).map_err(|e| ConfigError::DataDir(e.to_string()))?;
    Ok(dir)
}
