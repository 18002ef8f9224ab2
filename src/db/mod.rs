//! Local record store for Lumen Journal
//!
//! SQLite-backed storage for journal entries and app settings. The sync
//! engine reads entries and marks their sync flag through this module but
//! never rewrites entry content; content mutations come from the editor.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// A single journal entry as stored locally.
///
/// `content` is plaintext on disk; it only ever leaves the device encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub content: String,
    pub word_count: i64,
    pub sentiment_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub device_id: String,
    pub needs_sync: bool,
}

impl JournalEntry {
    /// Create a new entry with a fresh id, recomputing the word count.
    pub fn new(content: String, sentiment_score: f64, device_id: String) -> Self {
        let now = Utc::now();
        let word_count = content.split_whitespace().count() as i64;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            word_count,
            sentiment_score,
            created_at: now,
            updated_at: now,
            device_id,
            needs_sync: true,
        }
    }
}

/// Per-entry numeric metrics projection used for analytics-tier uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetrics {
    pub id: String,
    pub word_count: i64,
    pub sentiment_score: f64,
}

/// Thread-safe SQLite access through an r2d2 connection pool.
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    /// Open (or create) the journal database at the given path.
    pub fn new(db_path: PathBuf) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(&db_path);

        let pool = Pool::builder()
            .max_size(20)
            .min_idle(Some(4))
            .connection_timeout(std::time::Duration::from_secs(10))
            .test_on_check_out(false)
            .build(manager)?;

        let conn = pool.get()?;
        Self::init_connection(&conn)?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory();

        // Single connection: each in-memory connection is its own database.
        let pool = Pool::builder().max_size(1).build(manager)?;

        let conn = pool.get()?;
        Self::init_connection(&conn)?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    fn init_connection(conn: &Connection) -> DbResult<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;
        Ok(())
    }

    /// Get a connection from the pool.
    #[inline]
    pub fn get_conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    // =========================================================================
    // GENERIC HELPERS
    // =========================================================================

    /// Execute a statement, returning the number of affected rows.
    pub fn execute<P>(&self, sql: &str, params: P) -> DbResult<usize>
    where
        P: rusqlite::Params,
    {
        let conn = self.get_conn()?;
        let affected = conn.execute(sql, params)?;
        Ok(affected)
    }

    /// Execute an INSERT statement and return the last inserted row ID.
    pub fn execute_insert<P>(&self, sql: &str, params: P) -> DbResult<i64>
    where
        P: rusqlite::Params,
    {
        let conn = self.get_conn()?;
        conn.execute(sql, params)?;
        Ok(conn.last_insert_rowid())
    }

    /// Query multiple rows.
    pub fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> DbResult<Vec<T>>
    where
        P: rusqlite::Params,
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;
        rows.collect::<rusqlite::Result<Vec<T>>>()
            .map_err(DbError::from)
    }

    /// Query a single row.
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> DbResult<T>
    where
        P: rusqlite::Params,
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.get_conn()?;
        conn.query_row(sql, params, f).map_err(DbError::from)
    }

    /// Execute a batch of statements.
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(sql).map_err(DbError::from)
    }

    // =========================================================================
    // JOURNAL ENTRIES
    // =========================================================================

    /// Insert or replace an entry.
    pub fn upsert_entry(&self, entry: &JournalEntry) -> DbResult<()> {
        self.execute(
            r#"
            INSERT INTO entries (
                id, content, word_count, sentiment_score,
                created_at, updated_at, device_id, needs_sync
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                word_count = excluded.word_count,
                sentiment_score = excluded.sentiment_score,
                updated_at = excluded.updated_at,
                device_id = excluded.device_id,
                needs_sync = excluded.needs_sync
            "#,
            params![
                entry.id,
                entry.content,
                entry.word_count,
                entry.sentiment_score,
                entry.created_at.to_rfc3339(),
                entry.updated_at.to_rfc3339(),
                entry.device_id,
                entry.needs_sync as i64,
            ],
        )?;
        Ok(())
    }

    /// Load all entries, oldest first.
    pub fn get_all_entries(&self) -> DbResult<Vec<JournalEntry>> {
        self.query(
            r#"
            SELECT id, content, word_count, sentiment_score,
                   created_at, updated_at, device_id, needs_sync
            FROM entries
            ORDER BY created_at ASC
            "#,
            params![],
            row_to_entry,
        )
    }

    /// Load one entry by id.
    pub fn get_entry(&self, id: &str) -> DbResult<JournalEntry> {
        let entries = self.query(
            r#"
            SELECT id, content, word_count, sentiment_score,
                   created_at, updated_at, device_id, needs_sync
            FROM entries
            WHERE id = ?1
            "#,
            params![id],
            row_to_entry,
        )?;

        entries
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(id.to_string()))
    }

    /// Numeric metrics projection for all entries (analytics uploads).
    pub fn get_entry_metrics(&self) -> DbResult<Vec<EntryMetrics>> {
        self.query(
            "SELECT id, word_count, sentiment_score FROM entries ORDER BY created_at ASC",
            params![],
            |row| {
                Ok(EntryMetrics {
                    id: row.get(0)?,
                    word_count: row.get(1)?,
                    sentiment_score: row.get(2)?,
                })
            },
        )
    }

    /// Flip the needs_sync flag for an entry.
    pub fn mark_entry_synced(&self, id: &str, synced: bool) -> DbResult<()> {
        let affected = self.execute(
            "UPDATE entries SET needs_sync = ?1 WHERE id = ?2",
            params![(!synced) as i64, id],
        )?;
        if affected == 0 {
            return Err(DbError::NotFound(id.to_string()));
        }
        Ok(())
    }

    // =========================================================================
    // SETTINGS
    // =========================================================================

    /// Read a typed setting, `None` if unset.
    pub fn get_setting<T: serde::de::DeserializeOwned>(&self, key: &str) -> DbResult<Option<T>> {
        let rows = self.query(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        )?;

        match rows.into_iter().next() {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| DbError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    /// Write a typed setting.
    pub fn set_setting<T: Serialize>(&self, key: &str, value: &T) -> DbResult<()> {
        let raw =
            serde_json::to_string(value).map_err(|e| DbError::Serialization(e.to_string()))?;

        self.execute(
            r#"
            INSERT INTO settings (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![key, raw],
        )?;
        Ok(())
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<JournalEntry> {
    Ok(JournalEntry {
        id: row.get(0)?,
        content: row.get(1)?,
        word_count: row.get(2)?,
        sentiment_score: row.get(3)?,
        created_at: parse_ts(&row.get::<_, String>(4)?)?,
        updated_at: parse_ts(&row.get::<_, String>(5)?)?,
        device_id: row.get(6)?,
        needs_sync: row.get::<_, i64>(7)? != 0,
    })
}

fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| rusqlite::Error::InvalidQuery)
}

// ============================================================================
// Tests
// ============================================================================
