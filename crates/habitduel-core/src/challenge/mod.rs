//! Challenge aggregate and its durable records.
//!
//! These are the shapes this core reads and writes through the storage
//! collaborators. Creation of challenges, members, and the upfront weekly
//! rows belongs to the surrounding application.

mod week;

pub use week::{current_week, end_date, week_of_date};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// Unique identifier for a challenge.
pub type ChallengeId = i64;

/// Unique identifier for a user.
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeMode {
    Solo,
    Vs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChallengeStatus {
    InProgress,
    /// Terminal. Reached exactly once, through settlement.
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRole {
    Host,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberResult {
    Success,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WeeklyStatus {
    Pending,
    Success,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: ChallengeId,
    pub mode: ChallengeMode,
    pub status: ChallengeStatus,
    pub started_at: NaiveDate,
    pub duration_weeks: u32,
    /// Set together with the COMPLETED status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Challenge {
    /// Active week on `today`, 1-indexed and clamped to the duration.
    pub fn week_on(&self, today: NaiveDate) -> u32 {
        current_week(self.started_at, today, self.duration_weeks)
    }

    /// First day after the last week.
    pub fn end_date(&self) -> NaiveDate {
        end_date(self.started_at, self.duration_weeks)
    }

    /// Whether the whole duration has elapsed on `today`.
    pub fn is_due(&self, today: NaiveDate) -> bool {
        today >= self.end_date()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeMember {
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub role: MemberRole,
    /// Written once, by settlement.
    pub result: Option<MemberResult>,
}

/// One participant's record for one week.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyProgress {
    pub id: i64,
    pub challenge_id: ChallengeId,
    pub user_id: UserId,
    pub week_number: u32,
    pub title: String,
    pub content: String,
    pub target_time_seconds: u64,
    pub elapsed_time_seconds: u64,
    pub weekly_status: WeeklyStatus,
    pub is_complete: bool,
}

// ── Column codecs ────────────────────────────────────────────────────

macro_rules! column_codec {
    ($ty:ident, $column:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }

            pub fn parse(value: &str) -> Result<Self, DatabaseError> {
                match value {
                    $($text => Ok($ty::$variant),)+
                    other => Err(DatabaseError::CorruptValue {
                        column: $column.to_string(),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

column_codec!(ChallengeMode, "mode", { Solo => "SOLO", Vs => "VS" });
column_codec!(ChallengeStatus, "status", { InProgress => "IN_PROGRESS", Completed => "COMPLETED" });
column_codec!(MemberRole, "role", { Host => "HOST", Member => "MEMBER" });
column_codec!(MemberResult, "result", { Success => "SUCCESS", Fail => "FAIL" });
column_codec!(WeeklyStatus, "weekly_status", { Pending => "PENDING", Success => "SUCCESS", Fail => "FAIL" });
