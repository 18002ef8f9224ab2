//! Sync data models
//!
//! Shared contracts for the tier orchestrator, queue processor and conflict
//! manager: the ordered privacy tier, queue operations, transition results,
//! and the two-version conflict shape mirrored from the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::MetricKind;

/// Collection name for journal entry content in the sync queue and on the
/// remote store. Content-scoped queue clears target only this collection.
pub const ENTRIES_COLLECTION: &str = "entries";

// ============================================================================
// Privacy Tier
// ============================================================================

/// How much data the remote service may see. The derive order defines the
/// upgrade direction: moving right is an upgrade, left a downgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyTier {
    LocalOnly,
    AnalyticsSync,
    FullSync,
}

impl PrivacyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyTier::LocalOnly => "local_only",
            PrivacyTier::AnalyticsSync => "analytics_sync",
            PrivacyTier::FullSync => "full_sync",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "local_only" => Some(PrivacyTier::LocalOnly),
            "analytics_sync" => Some(PrivacyTier::AnalyticsSync),
            "full_sync" => Some(PrivacyTier::FullSync),
            _ => None,
        }
    }

    /// Whether this tier puts any data on the server at all.
    pub fn requires_server(&self) -> bool {
        *self > PrivacyTier::LocalOnly
    }
}

// ============================================================================
// Sync Queue
// ============================================================================

/// Mutation kind carried by a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOp {
    Create,
    Update,
    Delete,
}

impl SyncOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOp::Create => "create",
            SyncOp::Update => "update",
            SyncOp::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "create" => Some(SyncOp::Create),
            "update" => Some(SyncOp::Update),
            "delete" => Some(SyncOp::Delete),
            _ => None,
        }
    }
}

/// How much of the queue a downgrade clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueScope {
    /// Every pending item.
    All,
    /// Only items targeting the entries collection; tag-sync and other
    /// metadata items stay queued.
    ContentOnly,
}

// ============================================================================
// Tier Transition
// ============================================================================

/// Aggregated outcome of one tier transition.
///
/// Invariants: `success == (failed == 0)` and `failed == errors.len()`.
/// `deferred` marks an upgrade that skipped all server work for lack of an
/// auth token, so "synced" and "will sync once signed in" stay
/// distinguishable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTransitionResult {
    pub success: bool,
    pub processed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub deferred: bool,
}

impl TierTransitionResult {
    pub fn ok(processed: usize) -> Self {
        Self {
            success: true,
            processed,
            failed: 0,
            errors: Vec::new(),
            deferred: false,
        }
    }

    pub fn deferred() -> Self {
        Self {
            deferred: true,
            ..Self::ok(0)
        }
    }

    /// Fatal configuration-class failure: no work attempted.
    pub fn fatal(message: String) -> Self {
        Self {
            success: false,
            processed: 0,
            failed: 1,
            errors: vec![message],
            deferred: false,
        }
    }

    pub fn from_counts(processed: usize, errors: Vec<String>) -> Self {
        Self {
            success: errors.is_empty(),
            processed,
            failed: errors.len(),
            errors,
            deferred: false,
        }
    }

    /// Single human-readable error summary, if any step failed.
    pub fn error(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}

/// Advisory progress report emitted before each bulk item of a transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionProgress {
    pub current: usize,
    pub total: usize,
    pub operation: String,
}

/// Progress callback type used by the orchestrator.
pub type ProgressFn = dyn Fn(TransitionProgress) + Send + Sync;

// ============================================================================
// Conflicts
// ============================================================================

/// One side of a divergent edit, as stored on the server and mirrored
/// locally. Content is ciphertext; the tag is optional in the wire shape but
/// decryption treats its absence as a hard integrity failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictVersion {
    pub ciphertext: String,
    pub iv: String,
    pub tag: Option<String>,
    pub modified_at: DateTime<Utc>,
    pub device_id: String,
}

/// A server-detected divergence between two devices' edits of one entry.
/// Always exactly two versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub record_id: String,
    pub detected_at: DateTime<Utc>,
    pub local: ConflictVersion,
    pub remote: ConflictVersion,
}

/// User's resolution decision for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionChoice {
    Local,
    Remote,
    Merged,
}

impl ResolutionChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionChoice::Local => "local",
            ResolutionChoice::Remote => "remote",
            ResolutionChoice::Merged => "merged",
        }
    }
}

/// A conflict after both versions have been decrypted for display. Word
/// counts are recomputed from the decrypted text, not trusted from metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptedConflict {
    pub id: String,
    pub record_id: String,
    pub detected_at: DateTime<Utc>,
    pub local: DecryptedVersion,
    pub remote: DecryptedVersion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptedVersion {
    pub content: String,
    pub word_count: usize,
    pub modified_at: DateTime<Utc>,
    pub device_id: String,
}

// ============================================================================
// Metrics
// ============================================================================

/// One homomorphically encrypted metric value bound for the server.
/// Never contains plaintext content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedMetric {
    pub record_id: String,
    pub metric_type: MetricKind,
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Tests
// ============================================================================
