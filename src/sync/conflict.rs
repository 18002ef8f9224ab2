//! Conflict mirror and resolution
//!
//! The server is the source of truth for which conflicts exist; this module
//! keeps a local SQLite mirror of that list so conflicts stay inspectable
//! offline. Both versions of a conflict are ciphertext at rest and are only
//! decrypted on demand for display. Resolution is atomic: the mirror row is
//! removed only after the server confirms the resolution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::crypto::{decrypt_parts, encrypt_content, CryptoError, KeyManager};
use crate::db::{Database, DbError};

use super::api::{RemoteApi, ResolveConflictRequest, SyncApiError};
use super::models::{
    Conflict, ConflictVersion, DecryptedConflict, DecryptedVersion, ResolutionChoice,
};

const CONFLICT_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS conflicts (
    id TEXT PRIMARY KEY,
    record_id TEXT NOT NULL,
    detected_at TEXT NOT NULL,
    local_ciphertext TEXT NOT NULL,
    local_iv TEXT NOT NULL,
    local_tag TEXT,
    local_modified_at TEXT NOT NULL,
    local_device_id TEXT NOT NULL,
    remote_ciphertext TEXT NOT NULL,
    remote_iv TEXT NOT NULL,
    remote_tag TEXT,
    remote_modified_at TEXT NOT NULL,
    remote_device_id TEXT NOT NULL
);
";

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConflictError {
    #[error("authentication required")]
    AuthRequired,

    #[error("api error: {0}")]
    Api(#[from] SyncApiError),

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("conflict version is missing its authentication tag")]
    MissingAuthTag,

    #[error("conflict version failed to decrypt")]
    DecryptionFailed,

    #[error("merged content failed to encrypt: {0}")]
    EncryptionFailed(#[from] CryptoError),

    #[error("encryption key unavailable")]
    MissingKey,

    #[error("conflict not found: {0}")]
    NotFound(String),

    #[error("merged resolution requires merged content")]
    MissingMergedContent,
}

pub type ConflictResult<T> = Result<T, ConflictError>;

// ============================================================================
// ConflictManager
// ============================================================================

pub struct ConflictManager {
    db: Arc<Database>,
    api: Arc<dyn RemoteApi>,
    keys: Arc<KeyManager>,
}

impl ConflictManager {
    pub fn new(
        db: Arc<Database>,
        api: Arc<dyn RemoteApi>,
        keys: Arc<KeyManager>,
    ) -> ConflictResult<Self> {
        db.execute_batch(CONFLICT_SCHEMA)?;
        Ok(Self { db, api, keys })
    }

    /// Pulls the server's conflict list and replaces the mirror with it in
    /// one transaction. Requires authentication; conflict state is never
    /// guessed at locally.
    pub async fn fetch_from_backend(&self) -> ConflictResult<Vec<Conflict>> {
        if !self.api.has_token().await {
            return Err(ConflictError::AuthRequired);
        }

        let conflicts = match self.api.list_conflicts().await {
            Ok(conflicts) => conflicts,
            Err(SyncApiError::Unauthorized) => return Err(ConflictError::AuthRequired),
            Err(err) => return Err(err.into()),
        };

        self.replace_mirror(&conflicts)?;
        log::info!("conflict mirror refreshed: {} open conflict(s)", conflicts.len());
        Ok(conflicts)
    }

    /// Mirror contents, for offline inspection.
    pub fn local_conflicts(&self) -> ConflictResult<Vec<Conflict>> {
        let rows = self.db.query(
            "SELECT id, record_id, detected_at,
                    local_ciphertext, local_iv, local_tag, local_modified_at, local_device_id,
                    remote_ciphertext, remote_iv, remote_tag, remote_modified_at, remote_device_id
             FROM conflicts ORDER BY detected_at ASC",
            [],
            row_to_conflict,
        )?;
        rows.into_iter().map(finish_conflict).collect()
    }

    pub fn get_local(&self, id: &str) -> ConflictResult<Conflict> {
        let row = self
            .db
            .query_row(
                "SELECT id, record_id, detected_at,
                        local_ciphertext, local_iv, local_tag, local_modified_at, local_device_id,
                        remote_ciphertext, remote_iv, remote_tag, remote_modified_at, remote_device_id
                 FROM conflicts WHERE id = ?1",
                params![id],
                row_to_conflict,
            )
            .map_err(|err| match err {
                DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows) | DbError::NotFound(_) => {
                    ConflictError::NotFound(id.to_string())
                }
                other => other.into(),
            })?;
        finish_conflict(row)
    }

    /// Decrypts both versions for display. A missing auth tag or a failed
    /// decryption is a hard error; ciphertext is never surfaced as content.
    pub fn decrypt(&self, conflict: &Conflict) -> ConflictResult<DecryptedConflict> {
        let key = self.keys.symmetric_key().ok_or(ConflictError::MissingKey)?;

        Ok(DecryptedConflict {
            id: conflict.id.clone(),
            record_id: conflict.record_id.clone(),
            detected_at: conflict.detected_at,
            local: decrypt_version(&key, &conflict.local)?,
            remote: decrypt_version(&key, &conflict.remote)?,
        })
    }

    /// Resolves one conflict server-side, then drops its mirror row. On any
    /// failure the row is untouched and the conflict stays selectable.
    pub async fn resolve(
        &self,
        id: &str,
        choice: ResolutionChoice,
        merged_content: Option<&str>,
    ) -> ConflictResult<()> {
        // Row must exist before we talk to the server.
        let _conflict = self.get_local(id)?;

        let request = match choice {
            ResolutionChoice::Local | ResolutionChoice::Remote => ResolveConflictRequest {
                chosen_version: choice.as_str().to_string(),
                final_ciphertext: None,
                final_iv: None,
                final_tag: None,
            },
            ResolutionChoice::Merged => {
                let content = merged_content.ok_or(ConflictError::MissingMergedContent)?;
                let key = self.keys.symmetric_key().ok_or(ConflictError::MissingKey)?;
                let encrypted = encrypt_content(&key, content)?;
                ResolveConflictRequest {
                    chosen_version: choice.as_str().to_string(),
                    final_ciphertext: Some(encrypted.ciphertext),
                    final_iv: Some(encrypted.iv),
                    final_tag: Some(encrypted.tag),
                }
            }
        };

        match self.api.resolve_conflict(id, choice, request).await {
            Ok(()) => {}
            Err(SyncApiError::Unauthorized) => return Err(ConflictError::AuthRequired),
            Err(err) => return Err(err.into()),
        }

        self.db
            .execute("DELETE FROM conflicts WHERE id = ?1", params![id])?;
        log::info!("conflict {} resolved as {}", id, choice.as_str());
        Ok(())
    }

    fn replace_mirror(&self, conflicts: &[Conflict]) -> ConflictResult<()> {
        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction().map_err(DbError::from)?;

        tx.execute("DELETE FROM conflicts", [])
            .map_err(DbError::from)?;
        for conflict in conflicts {
            tx.execute(
                "INSERT INTO conflicts (
                    id, record_id, detected_at,
                    local_ciphertext, local_iv, local_tag, local_modified_at, local_device_id,
                    remote_ciphertext, remote_iv, remote_tag, remote_modified_at, remote_device_id
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    conflict.id,
                    conflict.record_id,
                    conflict.detected_at.to_rfc3339(),
                    conflict.local.ciphertext,
                    conflict.local.iv,
                    conflict.local.tag,
                    conflict.local.modified_at.to_rfc3339(),
                    conflict.local.device_id,
                    conflict.remote.ciphertext,
                    conflict.remote.iv,
                    conflict.remote.tag,
                    conflict.remote.modified_at.to_rfc3339(),
                    conflict.remote.device_id,
                ],
            )
            .map_err(DbError::from)?;
        }

        tx.commit().map_err(DbError::from)?;
        Ok(())
    }
}

fn decrypt_version(
    key: &crate::crypto::SymmetricKey,
    version: &ConflictVersion,
) -> ConflictResult<DecryptedVersion> {
    let tag = version.tag.as_deref().ok_or(ConflictError::MissingAuthTag)?;
    let content = decrypt_parts(key, &version.ciphertext, &version.iv, Some(tag)).map_err(
        |err| match err {
            CryptoError::MissingTag => ConflictError::MissingAuthTag,
            _ => ConflictError::DecryptionFailed,
        },
    )?;

    Ok(DecryptedVersion {
        word_count: content.split_whitespace().count(),
        content,
        modified_at: version.modified_at,
        device_id: version.device_id.clone(),
    })
}

// Raw mirror row before timestamp parsing.
type ConflictRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
);

fn row_to_conflict(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConflictRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
    ))
}

fn finish_conflict(row: ConflictRow) -> ConflictResult<Conflict> {
    let (
        id,
        record_id,
        detected_at,
        local_ciphertext,
        local_iv,
        local_tag,
        local_modified_at,
        local_device_id,
        remote_ciphertext,
        remote_iv,
        remote_tag,
        remote_modified_at,
        remote_device_id,
    ) = row;

    Ok(Conflict {
        id,
        record_id,
        detected_at: parse_ts(&detected_at)?,
        local: ConflictVersion {
            ciphertext: local_ciphertext,
            iv: local_iv,
            tag: local_tag,
            modified_at: parse_ts(&local_modified_at)?,
            device_id: local_device_id,
        },
        remote: ConflictVersion {
            ciphertext: remote_ciphertext,
            iv: remote_iv,
            tag: remote_tag,
            modified_at: parse_ts(&remote_modified_at)?,
            device_id: remote_device_id,
        },
    })
}

fn parse_ts(raw: &str) -> ConflictResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ConflictError::Database(DbError::Serialization(e.to_string())))
}

// ============================================================================
// Tests
// ============================================================================
