//! Sync Module - Privacy-Tiered Journal Synchronization
//!
//! Everything that moves journal data off the device:
//! - Privacy tiers (local only, encrypted metrics, full encrypted sync)
//! - Tier transitions as explicit step plans (upload on upgrade, delete on
//!   downgrade)
//! - Durable offline queue with best-effort drains
//! - Server-authoritative conflict list with a local mirror and atomic
//!   resolution
//!
//! Architecture:
//! - Zero-Knowledge: Server sees AES-256-GCM ciphertext and additively
//!   maskable metric ciphertexts, never plaintext
//! - Server-side tier record always updated before data moves
//! - All remote access behind the [`RemoteApi`] trait

pub mod api;
pub mod batch;
pub mod conflict;
pub mod diff;
pub mod engine;
pub mod models;
pub mod queue;
pub mod scheduler;
pub mod tier;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use api::{
    ApiResult, RemoteApi, ResolveConflictRequest, SetTierRequest, SyncApiClient, SyncApiError,
    UploadRecordRequest,
};

pub use models::{
    Conflict, ConflictVersion, DecryptedConflict, DecryptedVersion, EncryptedMetric, PrivacyTier,
    ProgressFn, QueueScope, ResolutionChoice, SyncOp, TierTransitionResult, TransitionProgress,
    ENTRIES_COLLECTION,
};

pub use batch::{run_best_effort, BatchItemError, BatchOutcome};
pub use conflict::{ConflictError, ConflictManager};
pub use diff::{word_diff, DiffSegment};
pub use engine::{EngineError, SyncConfig, SyncEngine};
pub use queue::{ProcessOutcome, QueueError, QueueItem, QueueProcessor, QueueStatus, SyncQueue};
pub use scheduler::{BackgroundScheduler, SchedulerError, SchedulerState};
pub use tier::{transition_steps, TierOrchestrator, TransitionStep};
