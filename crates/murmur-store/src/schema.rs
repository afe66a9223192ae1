//! Session-log schema.
//!
//! The schema version lives in SQLite's `user_version` pragma — murmur
//! owns its database file outright, so there is no bookkeeping table to
//! keep in sync with it. When a file is opened, [`prepare`] walks the
//! upgrade ladder from the file's version to [`SCHEMA_VERSION`] inside a
//! single transaction; each step knows only how to go from version N to
//! N+1. A file written by a newer build is refused rather than guessed at.

use rusqlite::{Connection, Transaction};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// The schema version this build reads and writes.
pub const SCHEMA_VERSION: i32 = 1;

/// Bring the connection's schema up to [`SCHEMA_VERSION`].
pub(crate) fn prepare(conn: &mut Connection) -> StoreResult<()> {
    let found = user_version(conn)?;

    if found == SCHEMA_VERSION {
        debug!(version = found, "schema is current");
        return Ok(());
    }
    if found > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    let tx = conn.transaction()?;
    let mut version = found;
    while version < SCHEMA_VERSION {
        upgrade_step(&tx, version)?;
        version += 1;
    }
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()?;

    info!(from = found, to = version, "schema prepared");
    Ok(())
}

/// One ladder step: everything needed to move from `version` to
/// `version + 1`.
fn upgrade_step(tx: &Transaction<'_>, version: i32) -> StoreResult<()> {
    match version {
        // Empty file → the session and turn tables.
        0 => {
            tx.execute_batch(
                "CREATE TABLE sessions (
                    id         TEXT PRIMARY KEY,
                    channel    TEXT NOT NULL,
                    user_id    TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX idx_sessions_recency ON sessions(channel, user_id, updated_at DESC);

                CREATE TABLE turns (
                    session_id       TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                    seq              INTEGER NOT NULL,
                    role             TEXT NOT NULL,
                    content          TEXT NOT NULL,
                    tool_calls_json  TEXT,
                    tool_result_json TEXT,
                    channel          TEXT NOT NULL,
                    inserted_at      INTEGER NOT NULL,
                    PRIMARY KEY (session_id, seq)
                );
                CREATE INDEX idx_turns_channel_time ON turns(channel, inserted_at DESC);",
            )?;
            Ok(())
        }
        other => Err(StoreError::Schema {
            reason: format!("no upgrade step from schema version {other}"),
        }),
    }
}

fn user_version(conn: &Connection) -> StoreResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_file_lands_on_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        prepare(&mut conn).unwrap();
        assert_eq!(user_version(&conn).unwrap(), SCHEMA_VERSION);

        // The base tables are usable.
        conn.execute(
            "INSERT INTO sessions (id, channel, user_id, created_at, updated_at) \
             VALUES ('s1', 'cli', 'u1', 0, 0)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn prepare_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        prepare(&mut conn).unwrap();
        prepare(&mut conn).unwrap();
        assert_eq!(user_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn files_from_a_newer_build_are_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1)
            .unwrap();

        match prepare(&mut conn) {
            Err(StoreError::SchemaTooNew { found, supported }) => {
                assert_eq!(found, SCHEMA_VERSION + 1);
                assert_eq!(supported, SCHEMA_VERSION);
            }
            other => panic!("expected SchemaTooNew, got {other:?}"),
        }
    }

    #[test]
    fn upgrade_runs_in_one_transaction() {
        // A failing step must leave the file at its original version.
        // Simulate by driving prepare over a version with no ladder step.
        let mut conn = Connection::open_in_memory().unwrap();
        prepare(&mut conn).unwrap();

        // Wind the version back without removing the tables: the retry
        // step fails (tables already exist) and the version must not move.
        conn.pragma_update(None, "user_version", 0).unwrap();
        assert!(prepare(&mut conn).is_err());
        assert_eq!(user_version(&conn).unwrap(), 0);
    }
}
