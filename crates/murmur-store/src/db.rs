//! SQLite handle for the session log.
//!
//! Murmur keeps one connection per database file behind a mutex. Every
//! write serializes through it, which is exactly the
//! single-writer-per-session discipline the turn log wants, and WAL keeps
//! concurrent readers unblocked. Async callers reach the connection
//! through [`Database::call`], which hops onto the blocking pool.
//!
//! Opening prepares the handle completely — pragmas applied, schema
//! created or upgraded — so a freshly opened database is ready for
//! appends. There is no separate migration step to forget.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::info;

use crate::error::StoreResult;
use crate::schema;

/// Shared handle to the session database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path`, ready to use.
    pub async fn open(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        tokio::task::spawn_blocking(move || {
            info!(path = %path.display(), "opening session database");
            Self::prepare(Connection::open(&path)?)
        })
        .await?
    }

    /// An in-memory database, schema included — for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(mut conn: Connection) -> StoreResult<Self> {
        configure(&conn)?;
        schema::prepare(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    ///
    /// Every turn-log read and write goes through here; the mutex is the
    /// write-serialization point. A poisoned lock is recovered rather than
    /// propagated — the connection itself is still sound after a panicking
    /// closure.
    pub async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&conn)
        })
        .await?
    }
}

/// Connection settings for an append-heavy, many-reader log.
fn configure(conn: &Connection) -> StoreResult<()> {
    // WAL so session loads never wait on an in-flight append.
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // With WAL, NORMAL sync loses at most the final append on power
    // failure, never the file.
    conn.pragma_update(None, "synchronous", "NORMAL")?;

    // Turn rows cascade from their session row.
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // Contending writers queue instead of erroring out.
    conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────
