//! Database schema migrations for habitduel.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};
use tracing::warn;

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
pub fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or_else(|e| {
        if !matches!(e, rusqlite::Error::QueryReturnedNoRows) {
            warn!(error = %e, "failed to read schema_version");
        }
        0
    })
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: challenges, members, weekly progress.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS challenges (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            mode           TEXT NOT NULL,
            status         TEXT NOT NULL DEFAULT 'IN_PROGRESS',
            started_at     TEXT NOT NULL,
            duration_weeks INTEGER NOT NULL,
            completed_at   TEXT
        );

        CREATE TABLE IF NOT EXISTS challenge_members (
            challenge_id INTEGER NOT NULL REFERENCES challenges(id),
            user_id      INTEGER NOT NULL,
            role         TEXT NOT NULL,
            result       TEXT,
            PRIMARY KEY (challenge_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS weekly_progress (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            challenge_id         INTEGER NOT NULL REFERENCES challenges(id),
            user_id              INTEGER NOT NULL,
            week_number          INTEGER NOT NULL,
            title                TEXT NOT NULL DEFAULT '',
            content              TEXT NOT NULL DEFAULT '',
            target_time_seconds  INTEGER NOT NULL,
            elapsed_time_seconds INTEGER NOT NULL DEFAULT 0,
            weekly_status        TEXT NOT NULL DEFAULT 'PENDING',
            is_complete          INTEGER NOT NULL DEFAULT 0,
            UNIQUE (challenge_id, user_id, week_number)
        );",
    )?;

    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: indexes for the settlement scans.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_challenges_status ON challenges(status);
         CREATE INDEX IF NOT EXISTS idx_weekly_progress_open
             ON weekly_progress(challenge_id, is_complete);",
    )?;

    set_schema_version(&tx, 2)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('challenges', 'challenge_members', 'weekly_progress')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
