//! Per-session turn log.
//!
//! Every session owns an append-only sequence of turns. Sequence numbers are
//! allocated inside the store (MAX(seq)+1 within the write transaction), so
//! stored order always equals append order regardless of caller clocks.
//! A damaged row in one session's log never affects another session: all
//! reads and writes are keyed by `session_id`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A session row: identity plus the index fields used for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id, e.g. `telegram_88121_42`.
    pub id: String,
    /// Channel tag the session belongs to.
    pub channel: String,
    /// Originating user id.
    pub user_id: String,
    /// Unix timestamp when the session was created.
    pub created_at: i64,
    /// Unix timestamp of the most recent append.
    pub updated_at: i64,
}

/// A stored conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    /// The session this turn belongs to.
    pub session_id: String,
    /// Position within the session, starting at 1.
    pub seq: i64,
    /// Turn role: "user", "assistant", "tool" or "system".
    pub role: String,
    /// Text content.
    pub content: String,
    /// JSON-serialized tool calls (assistant turns only).
    pub tool_calls_json: Option<String>,
    /// JSON-serialized tool result (tool turns only).
    pub tool_result_json: Option<String>,
    /// Channel tag, denormalized for the search index.
    pub channel: String,
    /// Unix timestamp when the turn was appended.
    pub inserted_at: i64,
}

/// A turn to append (everything except the store-assigned fields).
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub role: String,
    pub content: String,
    pub tool_calls_json: Option<String>,
    pub tool_result_json: Option<String>,
    pub channel: String,
}

impl NewTurn {
    /// A user input turn.
    pub fn user(content: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
            tool_calls_json: None,
            tool_result_json: None,
            channel: channel.into(),
        }
    }

    /// An assistant text turn.
    pub fn assistant(content: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
            tool_calls_json: None,
            tool_result_json: None,
            channel: channel.into(),
        }
    }

    /// An assistant turn carrying tool calls.
    pub fn assistant_tool_calls(
        tool_calls_json: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            role: "assistant".into(),
            content: String::new(),
            tool_calls_json: Some(tool_calls_json.into()),
            tool_result_json: None,
            channel: channel.into(),
        }
    }

    /// A tool result turn.
    pub fn tool_result(
        tool_result_json: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            role: "tool".into(),
            content: String::new(),
            tool_calls_json: None,
            tool_result_json: Some(tool_result_json.into()),
            channel: channel.into(),
        }
    }

    /// A system note turn.
    pub fn system(content: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
            tool_calls_json: None,
            tool_result_json: None,
            channel: channel.into(),
        }
    }
}

/// Filter for [`TurnStore::list_sessions`].
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    /// Restrict to a channel tag.
    pub channel: Option<String>,
    /// Restrict to a user id.
    pub user_id: Option<String>,
    /// Maximum number of rows (default 50).
    pub limit: Option<u32>,
}

/// Options for [`TurnStore::search_messages`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Restrict to a channel tag.
    pub channel: Option<String>,
    /// Maximum number of rows (default 20).
    pub limit: Option<u32>,
}

// ═══════════════════════════════════════════════════════════════════════
//  TurnStore
// ═══════════════════════════════════════════════════════════════════════

/// Append-only turn log with session listing and message search.
#[derive(Clone)]
pub struct TurnStore {
    db: Database,
}

impl TurnStore {
    /// Create a turn store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create the session row if it does not exist yet.
    #[instrument(skip(self))]
    pub async fn upsert_session(
        &self,
        session_id: &str,
        channel: &str,
        user_id: &str,
    ) -> StoreResult<()> {
        let session_id = session_id.to_string();
        let channel = channel.to_string();
        let user_id = user_id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sessions (id, channel, user_id, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?4) \
                     ON CONFLICT(id) DO NOTHING",
                    rusqlite::params![session_id, channel, user_id, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Fetch a session row by id.
    #[instrument(skip(self))]
    pub async fn get_session(&self, session_id: &str) -> StoreResult<SessionRecord> {
        let session_id = session_id.to_string();
        self.db
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, channel, user_id, created_at, updated_at \
                     FROM sessions WHERE id = ?1",
                    rusqlite::params![session_id],
                    |row| {
                        Ok(SessionRecord {
                            id: row.get(0)?,
                            channel: row.get(1)?,
                            user_id: row.get(2)?,
                            created_at: row.get(3)?,
                            updated_at: row.get(4)?,
                        })
                    },
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                        entity: "session",
                        id: session_id.clone(),
                    },
                    other => StoreError::Sqlite(other),
                })
            })
            .await
    }

    /// Append a turn to a session's log, returning the assigned sequence
    /// number.
    ///
    /// The session row must already exist (see
    /// [`TurnStore::upsert_session`]). Also bumps the session's
    /// `updated_at` so it sorts first in recency listings.
    #[instrument(skip(self, turn))]
    pub async fn append(&self, session_id: &str, turn: NewTurn) -> StoreResult<i64> {
        let session_id = session_id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .call(move |conn| {
                conn.execute_batch("BEGIN IMMEDIATE;")?;

                let result = (|| -> StoreResult<i64> {
                    let seq: i64 = conn.query_row(
                        "SELECT COALESCE(MAX(seq), 0) + 1 FROM turns WHERE session_id = ?1",
                        rusqlite::params![session_id],
                        |row| row.get(0),
                    )?;

                    let inserted = conn.execute(
                        "INSERT INTO turns \
                         (session_id, seq, role, content, tool_calls_json, tool_result_json, channel, inserted_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        rusqlite::params![
                            session_id,
                            seq,
                            turn.role,
                            turn.content,
                            turn.tool_calls_json,
                            turn.tool_result_json,
                            turn.channel,
                            now
                        ],
                    );
                    // A missing session row surfaces as a FK violation; map
                    // it to NotFound so callers see a typed error.
                    if let Err(e) = inserted {
                        return Err(match e {
                            rusqlite::Error::SqliteFailure(code, _)
                                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
                            {
                                StoreError::NotFound {
                                    entity: "session",
                                    id: session_id.clone(),
                                }
                            }
                            other => StoreError::Sqlite(other),
                        });
                    }

                    conn.execute(
                        "UPDATE sessions SET updated_at = ?2 WHERE id = ?1",
                        rusqlite::params![session_id, now],
                    )?;

                    Ok(seq)
                })();

                match &result {
                    Ok(_) => conn.execute_batch("COMMIT;")?,
                    Err(_) => {
                        let _ = conn.execute_batch("ROLLBACK;");
                    }
                }

                result
            })
            .await
    }

    /// Load a session's full turn log, ordered by sequence number.
    #[instrument(skip(self))]
    pub async fn load_session(&self, session_id: &str) -> StoreResult<Vec<TurnRecord>> {
        let session_id = session_id.to_string();
        self.db
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT session_id, seq, role, content, tool_calls_json, tool_result_json, channel, inserted_at \
                     FROM turns WHERE session_id = ?1 ORDER BY seq ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![session_id], row_to_turn)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// List sessions matching `filter`, most recently updated first.
    #[instrument(skip(self))]
    pub async fn list_sessions(&self, filter: SessionFilter) -> StoreResult<Vec<SessionRecord>> {
        let limit = filter.limit.unwrap_or(50);
        self.db
            .call(move |conn| {
                let mut sql = String::from(
                    "SELECT id, channel, user_id, created_at, updated_at FROM sessions WHERE 1=1",
                );
                let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
                if let Some(channel) = &filter.channel {
                    sql.push_str(" AND channel = ?");
                    params.push(Box::new(channel.clone()));
                }
                if let Some(user_id) = &filter.user_id {
                    sql.push_str(" AND user_id = ?");
                    params.push(Box::new(user_id.clone()));
                }
                sql.push_str(" ORDER BY updated_at DESC LIMIT ?");
                params.push(Box::new(limit));

                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())), |row| {
                        Ok(SessionRecord {
                            id: row.get(0)?,
                            channel: row.get(1)?,
                            user_id: row.get(2)?,
                            created_at: row.get(3)?,
                            updated_at: row.get(4)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Full-text-ish search over turn content via `LIKE`, newest first.
    ///
    /// The query string is escaped so `%` and `_` match literally.
    #[instrument(skip(self))]
    pub async fn search_messages(
        &self,
        query: &str,
        opts: SearchOptions,
    ) -> StoreResult<Vec<TurnRecord>> {
        let pattern = format!("%{}%", escape_like(query));
        let limit = opts.limit.unwrap_or(20);
        self.db
            .call(move |conn| {
                let rows = match &opts.channel {
                    Some(channel) => {
                        let mut stmt = conn.prepare(
                            "SELECT session_id, seq, role, content, tool_calls_json, tool_result_json, channel, inserted_at \
                             FROM turns WHERE channel = ?1 AND content LIKE ?2 ESCAPE '\\' \
                             ORDER BY inserted_at DESC LIMIT ?3",
                        )?;
                        stmt.query_map(rusqlite::params![channel, pattern, limit], row_to_turn)?
                            .collect::<Result<Vec<_>, _>>()?
                    }
                    None => {
                        let mut stmt = conn.prepare(
                            "SELECT session_id, seq, role, content, tool_calls_json, tool_result_json, channel, inserted_at \
                             FROM turns WHERE content LIKE ?1 ESCAPE '\\' \
                             ORDER BY inserted_at DESC LIMIT ?2",
                        )?;
                        stmt.query_map(rusqlite::params![pattern, limit], row_to_turn)?
                            .collect::<Result<Vec<_>, _>>()?
                    }
                };
                Ok(rows)
            })
            .await
    }

    /// Number of turns stored for a session.
    #[instrument(skip(self))]
    pub async fn turn_count(&self, session_id: &str) -> StoreResult<i64> {
        let session_id = session_id.to_string();
        self.db
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM turns WHERE session_id = ?1",
                    rusqlite::params![session_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }

    /// Delete a session and its turns (cascade).
    #[instrument(skip(self))]
    pub async fn delete_session(&self, session_id: &str) -> StoreResult<()> {
        let session_id = session_id.to_string();
        self.db
            .call(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM sessions WHERE id = ?1", rusqlite::params![session_id])?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "session",
                        id: session_id,
                    });
                }
                debug!("session deleted");
                Ok(())
            })
            .await
    }
}

/// Map a turns row to a [`TurnRecord`].
fn row_to_turn(row: &rusqlite::Row<'_>) -> rusqlite::Result<TurnRecord> {
    Ok(TurnRecord {
        session_id: row.get(0)?,
        seq: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        tool_calls_json: row.get(4)?,
        tool_result_json: row.get(5)?,
        channel: row.get(6)?,
        inserted_at: row.get(7)?,
    })
}

/// Escape `%`, `_` and `\` for a LIKE pattern with `ESCAPE '\'`.
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

// ── tests ────────────────────────────────────────────────────────────
