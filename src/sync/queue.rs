//! Offline sync queue
//!
//! Durable outbox for entry mutations made while offline or signed out.
//! Items survive restarts in SQLite and drain in insertion order. A drain
//! pass is one attempt per item: successes are removed, failures are marked
//! and retained for the next pass, and one bad item never blocks the rest.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::params;

use crate::db::{Database, DbError};

use super::api::{RemoteApi, SyncApiError};
use super::models::{QueueScope, SyncOp, ENTRIES_COLLECTION};

const QUEUE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    op TEXT NOT NULL,
    collection TEXT NOT NULL,
    record_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sync_queue_collection ON sync_queue(collection);
";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("corrupt queue item {id}: {reason}")]
    CorruptItem { id: i64, reason: String },
}

pub type QueueResult<T> = Result<T, QueueError>;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: i64,
    pub op: SyncOp,
    pub collection: String,
    pub record_id: String,
    pub payload: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub failed: usize,
    pub total: usize,
}

/// Outcome of one drain pass over the queue.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    pub processed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

// ============================================================================
// SyncQueue
// ============================================================================

pub struct SyncQueue {
    db: Arc<Database>,
}

impl SyncQueue {
    /// Opens the queue over an existing database, creating its table if
    /// missing.
    pub fn new(db: Arc<Database>) -> QueueResult<Self> {
        db.execute_batch(QUEUE_SCHEMA)?;
        Ok(Self { db })
    }

    /// Appends a mutation. Returns the durable queue id.
    pub fn enqueue(
        &self,
        op: SyncOp,
        collection: &str,
        record_id: &str,
        payload: &str,
    ) -> QueueResult<i64> {
        let id = self.db.execute_insert(
            "INSERT INTO sync_queue (op, collection, record_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                op.as_str(),
                collection,
                record_id,
                payload,
                Utc::now().to_rfc3339(),
            ],
        )?;
        log::debug!("queued {} {} / {} as item {}", op.as_str(), collection, record_id, id);
        Ok(id)
    }

    /// All items awaiting an attempt, oldest first. Previously failed items
    /// are included; every pass retries them once.
    pub fn pending_items(&self) -> QueueResult<Vec<QueueItem>> {
        let rows = self.db.query(
            "SELECT id, op, collection, record_id, payload, attempts, last_error
             FROM sync_queue ORDER BY id ASC",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            },
        )?;

        let mut items = Vec::with_capacity(rows.len());
        for (id, op, collection, record_id, payload, attempts, last_error) in rows {
            let op = SyncOp::from_str(&op).ok_or_else(|| QueueError::CorruptItem {
                id,
                reason: format!("unknown op '{}'", op),
            })?;
            items.push(QueueItem {
                id,
                op,
                collection,
                record_id,
                payload,
                attempts,
                last_error,
            });
        }
        Ok(items)
    }

    pub fn remove(&self, id: i64) -> QueueResult<()> {
        self.db
            .execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn mark_failed(&self, id: i64, error: &str) -> QueueResult<()> {
        self.db.execute(
            "UPDATE sync_queue
             SET status = 'failed', attempts = attempts + 1, last_error = ?2
             WHERE id = ?1",
            params![id, error],
        )?;
        Ok(())
    }

    pub fn status(&self) -> QueueResult<QueueStatus> {
        let rows = self.db.query(
            "SELECT status, COUNT(*) FROM sync_queue GROUP BY status",
            [],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?)),
        )?;

        let mut status = QueueStatus::default();
        for (state, count) in rows {
            match state.as_str() {
                "failed" => status.failed += count,
                _ => status.pending += count,
            }
            status.total += count;
        }
        Ok(status)
    }

    /// Drops queue items per the downgrade scope.
    pub fn clear(&self, scope: QueueScope) -> QueueResult<usize> {
        match scope {
            QueueScope::All => self.clear_all(),
            QueueScope::ContentOnly => self.clear_collection(ENTRIES_COLLECTION),
        }
    }

    pub fn clear_all(&self) -> QueueResult<usize> {
        let removed = self.db.execute("DELETE FROM sync_queue", [])?;
        if removed > 0 {
            log::info!("cleared {} queue item(s)", removed);
        }
        Ok(removed)
    }

    /// Removes only items targeting one collection; others stay queued.
    pub fn clear_collection(&self, collection: &str) -> QueueResult<usize> {
        let removed = self.db.execute(
            "DELETE FROM sync_queue WHERE collection = ?1",
            params![collection],
        )?;
        if removed > 0 {
            log::info!("cleared {} {} queue item(s)", removed, collection);
        }
        Ok(removed)
    }
}

// ============================================================================
// QueueProcessor
// ============================================================================

/// Drains the queue against the remote API, one attempt per item.
pub struct QueueProcessor {
    queue: Arc<SyncQueue>,
    api: Arc<dyn RemoteApi>,
}

impl QueueProcessor {
    pub fn new(queue: Arc<SyncQueue>, api: Arc<dyn RemoteApi>) -> Self {
        Self { queue, api }
    }

    /// One best-effort pass. Skips entirely (no attempts counted) when no
    /// auth token is held, since every item would fail the same way.
    pub async fn process(&self) -> QueueResult<ProcessOutcome> {
        let mut outcome = ProcessOutcome::default();

        if !self.api.has_token().await {
            log::debug!("queue drain skipped: not authenticated");
            return Ok(outcome);
        }

        let items = self.queue.pending_items()?;
        if items.is_empty() {
            return Ok(outcome);
        }
        log::info!("draining {} queued mutation(s)", items.len());

        for item in items {
            let result = self
                .api
                .push_mutation(item.op, &item.collection, &item.record_id, &item.payload)
                .await;

            match result {
                Ok(()) => {
                    self.queue.remove(item.id)?;
                    outcome.processed += 1;
                }
                // A delete for a record the server never saw is already done.
                Err(SyncApiError::NotFound) if item.op == SyncOp::Delete => {
                    self.queue.remove(item.id)?;
                    outcome.processed += 1;
                }
                Err(err) => {
                    let message = format!("{} {}: {}", item.op.as_str(), item.record_id, err);
                    log::warn!("queue item {} failed: {}", item.id, message);
                    self.queue.mark_failed(item.id, &message)?;
                    outcome.failed += 1;
                    outcome.errors.push(message);
                }
            }
        }

        Ok(outcome)
    }
}

// ============================================================================
// Tests
// ============================================================================
