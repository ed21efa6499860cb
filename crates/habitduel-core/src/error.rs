//! Core error types for habitduel-core.
//!
//! The taxonomy mirrors how callers react to a failure:
//! - [`CoreError::Authorization`] and [`CoreError::NotFound`] are surfaced
//!   directly to synchronous callers.
//! - [`CoreError::StateConflict`] is turned into an `ERROR` broadcast by the
//!   live endpoint, which has no reply path.
//! - [`CoreError::Database`] is the transient class; nothing retries it
//!   inline.

use std::path::PathBuf;
use thiserror::Error;

use crate::challenge::{ChallengeId, UserId};

/// Core error type for habitduel-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The caller is not a participant of the challenge.
    #[error("user {user_id} is not a participant of challenge {challenge_id}")]
    Authorization {
        challenge_id: ChallengeId,
        user_id: UserId,
    },

    /// A challenge or weekly progress row does not exist.
    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    /// The requested transition conflicts with the current state.
    #[error("{0}")]
    StateConflict(#[from] StateConflict),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, CoreError::StateConflict(_))
    }

    /// Persistence failures that may succeed when the whole operation is
    /// retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Database(_))
    }
}

/// Missing records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("challenge {0}")]
    Challenge(ChallengeId),

    #[error("weekly progress for user {user_id} in challenge {challenge_id}, week {week}")]
    WeeklyProgress {
        challenge_id: ChallengeId,
        user_id: UserId,
        week: u32,
    },
}

/// Conflicts between a requested action and the current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateConflict {
    #[error("timer already running for user {user_id} in challenge {challenge_id}")]
    AlreadyRunning {
        challenge_id: ChallengeId,
        user_id: UserId,
    },

    #[error("no running timer for user {user_id} in challenge {challenge_id}")]
    NotRunning {
        challenge_id: ChallengeId,
        user_id: UserId,
    },

    #[error("week {week} of challenge {challenge_id} is already complete")]
    AlreadyComplete { challenge_id: ChallengeId, week: u32 },

    #[error("challenge {0} is already completed")]
    ChallengeClosed(ChallengeId),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Connection mutex was poisoned by a panicking holder
    #[error("Database connection poisoned")]
    Poisoned,

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A check-and-set write kept losing to concurrent writers
    #[error("Concurrent updates to {0}; retry later")]
    Contended(String),

    /// A stored value could not be decoded
    #[error("Corrupt value in column '{column}': {value}")]
    CorruptValue { column: String, value: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// Payload received on the live endpoint could not be decoded
    #[error("Unsupported live payload: {0}")]
    UnsupportedPayload(String),
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
