//! SQLite-backed storage for challenges, members, and weekly progress.
//!
//! [`Database`] implements the three lookup/persist collaborators the core
//! consumes ([`ChallengeStore`], [`MemberStore`], [`ProgressStore`]). It also
//! carries the seeding operation the surrounding application would normally
//! own, so the CLI and tests can create challenges.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::{data_dir, migrations, ChallengeStore, MemberStore, ProgressStore};
use crate::challenge::{
    Challenge, ChallengeId, ChallengeMember, ChallengeMode, ChallengeStatus, MemberResult,
    MemberRole, UserId, WeeklyProgress, WeeklyStatus,
};
use crate::error::{DatabaseError, Result, ValidationError};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Input for [`Database::create_challenge`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChallenge {
    pub mode: ChallengeMode,
    pub started_at: NaiveDate,
    pub duration_weeks: u32,
    pub host_id: UserId,
    /// Opponent for VS challenges.
    pub member_id: Option<UserId>,
    /// Weekly target applied to every seeded week.
    pub target_time_seconds: u64,
}

/// SQLite database shared across threads behind an `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `~/.config/habitduel/habitduel.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("habitduel.db");
        Self::open_at(&path)
    }

    /// Open (or create) the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::migrate(&conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::Poisoned)
    }

    // === Seeding ===

    /// Create a challenge, its members, and every participant's weekly rows
    /// in a single transaction.
    pub fn create_challenge(&self, new: &NewChallenge) -> Result<Challenge> {
        if new.duration_weeks == 0 {
            return Err(ValidationError::InvalidValue {
                field: "duration_weeks".into(),
                message: "must be at least 1".into(),
            }
            .into());
        }
        if new.mode == ChallengeMode::Solo && new.member_id.is_some() {
            return Err(ValidationError::InvalidValue {
                field: "member_id".into(),
                message: "SOLO challenges have a single participant".into(),
            }
            .into());
        }
        if new.member_id == Some(new.host_id) {
            return Err(ValidationError::InvalidValue {
                field: "member_id".into(),
                message: "opponent must differ from host".into(),
            }
            .into());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO challenges (mode, status, started_at, duration_weeks)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                new.mode.as_str(),
                ChallengeStatus::InProgress.as_str(),
                new.started_at.format(DATE_FORMAT).to_string(),
                new.duration_weeks,
            ],
        )?;
        let challenge_id = tx.last_insert_rowid();

        let participants = std::iter::once((new.host_id, MemberRole::Host))
            .chain(new.member_id.map(|id| (id, MemberRole::Member)));
        for (user_id, role) in participants {
            tx.execute(
                "INSERT INTO challenge_members (challenge_id, user_id, role) VALUES (?1, ?2, ?3)",
                params![challenge_id, user_id, role.as_str()],
            )?;
            for week in 1..=new.duration_weeks {
                tx.execute(
                    "INSERT INTO weekly_progress
                        (challenge_id, user_id, week_number, title, target_time_seconds)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        challenge_id,
                        user_id,
                        week,
                        format!("Week {week}"),
                        new.target_time_seconds,
                    ],
                )?;
            }
        }

        tx.commit()?;
        debug!(challenge_id, mode = new.mode.as_str(), "challenge created");

        Ok(Challenge {
            id: challenge_id,
            mode: new.mode,
            status: ChallengeStatus::InProgress,
            started_at: new.started_at,
            duration_weeks: new.duration_weeks,
            completed_at: None,
        })
    }
}

// === Row mapping ===

fn conversion_error(idx: usize, err: DatabaseError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn text_column<T>(
    row: &Row,
    idx: usize,
    parse: fn(&str) -> Result<T, DatabaseError>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).map_err(|e| conversion_error(idx, e))
}

fn date_column(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|_| {
        conversion_error(
            idx,
            DatabaseError::CorruptValue {
                column: "started_at".into(),
                value: raw.clone(),
            },
        )
    })
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

const CHALLENGE_COLUMNS: &str = "id, mode, status, started_at, duration_weeks, completed_at";

fn row_to_challenge(row: &Row) -> rusqlite::Result<Challenge> {
    Ok(Challenge {
        id: row.get(0)?,
        mode: text_column(row, 1, ChallengeMode::parse)?,
        status: text_column(row, 2, ChallengeStatus::parse)?,
        started_at: date_column(row, 3)?,
        duration_weeks: row.get(4)?,
        completed_at: timestamp_column(row, 5)?,
    })
}

fn row_to_member(row: &Row) -> rusqlite::Result<ChallengeMember> {
    let result: Option<String> = row.get(3)?;
    let result = result
        .map(|raw| MemberResult::parse(&raw).map_err(|e| conversion_error(3, e)))
        .transpose()?;
    Ok(ChallengeMember {
        challenge_id: row.get(0)?,
        user_id: row.get(1)?,
        role: text_column(row, 2, MemberRole::parse)?,
        result,
    })
}

const PROGRESS_COLUMNS: &str = "id, challenge_id, user_id, week_number, title, content,
    target_time_seconds, elapsed_time_seconds, weekly_status, is_complete";

fn row_to_progress(row: &Row) -> rusqlite::Result<WeeklyProgress> {
    Ok(WeeklyProgress {
        id: row.get(0)?,
        challenge_id: row.get(1)?,
        user_id: row.get(2)?,
        week_number: row.get(3)?,
        title: row.get(4)?,
        content: row.get(5)?,
        target_time_seconds: row.get(6)?,
        elapsed_time_seconds: row.get(7)?,
        weekly_status: text_column(row, 8, WeeklyStatus::parse)?,
        is_complete: row.get(9)?,
    })
}

// === Collaborator implementations ===

impl ChallengeStore for Database {
    fn find_challenge(&self, id: ChallengeId) -> Result<Option<Challenge>> {
        let conn = self.conn()?;
        let challenge = conn
            .query_row(
                &format!("SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = ?1"),
                params![id],
                row_to_challenge,
            )
            .optional()?;
        Ok(challenge)
    }

    fn list_in_progress(&self) -> Result<Vec<Challenge>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE status = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(
            params![ChallengeStatus::InProgress.as_str()],
            row_to_challenge,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn complete_challenge(
        &self,
        id: ChallengeId,
        results: &[(UserId, MemberResult)],
        completed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE challenges SET status = ?1, completed_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                ChallengeStatus::Completed.as_str(),
                completed_at.to_rfc3339(),
                id,
                ChallengeStatus::InProgress.as_str(),
            ],
        )?;
        if changed == 0 {
            // Dropping the transaction rolls it back.
            return Ok(false);
        }

        for (user_id, result) in results {
            tx.execute(
                "UPDATE challenge_members SET result = ?1
                 WHERE challenge_id = ?2 AND user_id = ?3 AND result IS NULL",
                params![result.as_str(), id, user_id],
            )?;
        }

        tx.commit()?;
        Ok(true)
    }
}

impl MemberStore for Database {
    fn find_member(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> Result<Option<ChallengeMember>> {
        let conn = self.conn()?;
        let member = conn
            .query_row(
                "SELECT challenge_id, user_id, role, result FROM challenge_members
                 WHERE challenge_id = ?1 AND user_id = ?2",
                params![challenge_id, user_id],
                row_to_member,
            )
            .optional()?;
        Ok(member)
    }

    fn list_members(&self, challenge_id: ChallengeId) -> Result<Vec<ChallengeMember>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT challenge_id, user_id, role, result FROM challenge_members
             WHERE challenge_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map(params![challenge_id], row_to_member)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl ProgressStore for Database {
    fn find_progress(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
        week: u32,
    ) -> Result<Option<WeeklyProgress>> {
        let conn = self.conn()?;
        let progress = conn
            .query_row(
                &format!(
                    "SELECT {PROGRESS_COLUMNS} FROM weekly_progress
                     WHERE challenge_id = ?1 AND user_id = ?2 AND week_number = ?3"
                ),
                params![challenge_id, user_id, week],
                row_to_progress,
            )
            .optional()?;
        Ok(progress)
    }

    fn list_progress(
        &self,
        challenge_id: ChallengeId,
        user_id: UserId,
    ) -> Result<Vec<WeeklyProgress>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM weekly_progress
             WHERE challenge_id = ?1 AND user_id = ?2 ORDER BY week_number"
        ))?;
        let rows = stmt.query_map(params![challenge_id, user_id], row_to_progress)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_open_progress(&self, challenge_id: ChallengeId) -> Result<Vec<WeeklyProgress>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROGRESS_COLUMNS} FROM weekly_progress
             WHERE challenge_id = ?1 AND is_complete = 0 ORDER BY user_id, week_number"
        ))?;
        let rows = stmt.query_map(params![challenge_id], row_to_progress)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn commit_progress(&self, progress: &WeeklyProgress, read_elapsed: u64) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE weekly_progress
             SET elapsed_time_seconds = ?1, weekly_status = ?2, is_complete = ?3
             WHERE id = ?4 AND is_complete = 0 AND weekly_status = ?5
               AND elapsed_time_seconds = ?6",
            params![
                progress.elapsed_time_seconds,
                progress.weekly_status.as_str(),
                progress.is_complete,
                progress.id,
                WeeklyStatus::Pending.as_str(),
                read_elapsed,
            ],
        )?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn vs_challenge(db: &Database) -> Challenge {
        db.create_challenge(&NewChallenge {
            mode: ChallengeMode::Vs,
            started_at: date(2026, 1, 1),
            duration_weeks: 4,
            host_id: 1,
            member_id: Some(2),
            target_time_seconds: 3_600,
        })
        .unwrap()
    }

    #[test]
    fn create_seeds_members_and_weeks() {
        let db = Database::open_memory().unwrap();
        let challenge = vs_challenge(&db);

        let loaded = db.find_challenge(challenge.id).unwrap().unwrap();
        assert_eq!(loaded, challenge);

        let members = db.list_members(challenge.id).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].role, MemberRole::Host);
        assert_eq!(members[1].role, MemberRole::Member);
        assert!(members.iter().all(|m| m.result.is_none()));

        let weeks = db.list_progress(challenge.id, 2).unwrap();
        assert_eq!(weeks.len(), 4);
        assert_eq!(weeks[3].week_number, 4);
        assert_eq!(weeks[0].target_time_seconds, 3_600);
        assert_eq!(weeks[0].weekly_status, WeeklyStatus::Pending);
    }

    #[test]
    fn create_rejects_solo_with_opponent() {
        let db = Database::open_memory().unwrap();
        let err = db
            .create_challenge(&NewChallenge {
                mode: ChallengeMode::Solo,
                started_at: date(2026, 1, 1),
                duration_weeks: 2,
                host_id: 1,
                member_id: Some(2),
                target_time_seconds: 60,
            })
            .unwrap_err();
        assert!(err.to_string().contains("member_id"));
    }

    #[test]
    fn commit_progress_skips_sealed_rows() {
        let db = Database::open_memory().unwrap();
        let challenge = vs_challenge(&db);
        let mut week = db.find_progress(challenge.id, 1, 1).unwrap().unwrap();

        week.elapsed_time_seconds = 4_000;
        week.weekly_status = WeeklyStatus::Success;
        week.is_complete = true;
        assert!(db.commit_progress(&week, 0).unwrap());

        week.elapsed_time_seconds = 9_999;
        assert!(!db.commit_progress(&week, 4_000).unwrap());

        let stored = db.find_progress(challenge.id, 1, 1).unwrap().unwrap();
        assert_eq!(stored.elapsed_time_seconds, 4_000);
        assert_eq!(db.list_open_progress(challenge.id).unwrap().len(), 7);
    }

    #[test]
    fn commit_progress_rejects_stale_read() {
        let db = Database::open_memory().unwrap();
        let challenge = vs_challenge(&db);
        let read = db.find_progress(challenge.id, 1, 1).unwrap().unwrap();

        let mut first = read.clone();
        first.elapsed_time_seconds = 50;
        assert!(db.commit_progress(&first, read.elapsed_time_seconds).unwrap());

        // Computed from the same read, so it would erase the 50s above.
        let mut stale = read.clone();
        stale.weekly_status = WeeklyStatus::Fail;
        stale.is_complete = true;
        assert!(!db.commit_progress(&stale, read.elapsed_time_seconds).unwrap());

        let stored = db.find_progress(challenge.id, 1, 1).unwrap().unwrap();
        assert_eq!(stored.elapsed_time_seconds, 50);
        assert_eq!(stored.weekly_status, WeeklyStatus::Pending);
        assert!(!stored.is_complete);
    }

    #[test]
    fn complete_challenge_is_check_and_set() {
        let db = Database::open_memory().unwrap();
        let challenge = vs_challenge(&db);
        let now = Utc::now();

        let first = [(1, MemberResult::Success), (2, MemberResult::Fail)];
        assert!(db.complete_challenge(challenge.id, &first, now).unwrap());

        let second = [(1, MemberResult::Fail), (2, MemberResult::Success)];
        assert!(!db.complete_challenge(challenge.id, &second, now).unwrap());

        let members = db.list_members(challenge.id).unwrap();
        assert_eq!(members[0].result, Some(MemberResult::Success));
        assert_eq!(members[1].result, Some(MemberResult::Fail));

        let stored = db.find_challenge(challenge.id).unwrap().unwrap();
        assert_eq!(stored.status, ChallengeStatus::Completed);
        assert!(stored.completed_at.is_some());
        assert!(db.list_in_progress().unwrap().is_empty());
    }

    #[test]
    fn open_at_persists_across_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("habitduel.db");
        let id = {
            let db = Database::open_at(&path).unwrap();
            vs_challenge(&db).id
        };
        let db = Database::open_at(&path).unwrap();
        assert!(db.find_challenge(id).unwrap().is_some());
    }
}
