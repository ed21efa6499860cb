//! # HabitDuel Core Library
//!
//! Live timer core for weekly habit challenges. Participants start and stop
//! a timer against their current week; stopped time accumulates into the
//! week's record, the opponent sees the timer state in real time, and a
//! daily job settles challenges whose duration has elapsed.
//!
//! ## Architecture
//!
//! - **Timer**: in-memory running sessions keyed by `(challenge, user)` and
//!   a coordinator that validates and commits each start/stop
//! - **Progress**: the weekly PENDING -> SUCCESS | FAIL state machine behind
//!   a pluggable completion policy
//! - **Realtime**: per-challenge broadcast channels and the live endpoint
//! - **Settlement**: week close-out and the final SOLO/VS decision
//! - **Storage**: SQLite records and TOML configuration
//!
//! ## Key Components
//!
//! - [`TimerCoordinator`]: start/stop/status of a participant's timer
//! - [`LiveEndpoint`]: live payload handling and broadcast
//! - [`SettlementScheduler`]: daily close-out and settlement job
//! - [`Database`]: challenge, member, and weekly progress persistence
//! - [`Config`]: application configuration management

pub mod challenge;
pub mod clock;
pub mod error;
pub mod progress;
pub mod realtime;
pub mod settlement;
pub mod storage;
pub mod timer;

pub use challenge::{
    Challenge, ChallengeId, ChallengeMember, ChallengeMode, ChallengeStatus, MemberResult,
    MemberRole, UserId, WeeklyProgress, WeeklyStatus,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, CoreError, DatabaseError, NotFoundError, StateConflict, ValidationError};
pub use progress::{CompletionPolicy, ProgressStateMachine, RatioOfTarget, TargetReached, WeekWindow};
pub use realtime::{LiveAction, LiveEndpoint, LiveRequest, Principal, RealtimeBroadcaster, SignalStatus, TimerMessage};
pub use settlement::{SchedulerHandle, SettlementOutcome, SettlementReport, SettlementScheduler, TieBreak};
pub use storage::{Config, Database, NewChallenge, Store};
pub use timer::{SessionRegistry, TimerCoordinator, TimerStarted, TimerStatus, TimerStopped};
