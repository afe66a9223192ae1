//! # murmur-store
//!
//! Durable persistence for the Murmur agent runtime.
//!
//! Conversation turns are stored in SQLite (WAL mode) as an append-only log
//! keyed by session id, with a secondary index on `(channel, user, recency)`
//! for session listing and on `(channel, inserted_at)` for message search.
//!
//! The write path is single-writer-per-session: each session actor is the
//! only producer of appends for its own log, so turn order always matches
//! append order. Concurrent readers are served by WAL.
//!
//! ## Quick start
//!
//! ```ignore
//! use murmur_store::{Database, TurnStore, NewTurn};
//!
//! let db = Database::open("data/murmur.db").await?;
//! let turns = TurnStore::new(db);
//! turns.upsert_session("tg_42_7", "telegram", "7").await?;
//! turns.append("tg_42_7", NewTurn::user("hello", "telegram")).await?;
//! ```

pub mod db;
pub mod error;
pub mod schema;
pub mod turns;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use turns::{NewTurn, SearchOptions, SessionFilter, SessionRecord, TurnRecord, TurnStore};
