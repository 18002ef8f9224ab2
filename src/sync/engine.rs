//! Sync engine facade
//!
//! Single owner of the sync stack: device identity and settings, the tier
//! orchestrator, the offline queue, and the conflict manager. The app layer
//! talks to this type; the parts underneath stay composable for tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::crypto::{encrypt_content, CryptoError, KeyManager};
use crate::db::{Database, DbError};

use super::api::RemoteApi;
use super::conflict::{ConflictError, ConflictManager};
use super::models::{
    Conflict, DecryptedConflict, PrivacyTier, ProgressFn, ResolutionChoice, SyncOp,
    TierTransitionResult, ENTRIES_COLLECTION,
};
use super::queue::{ProcessOutcome, QueueError, QueueProcessor, QueueStatus, SyncQueue};
use super::tier::TierOrchestrator;

const CONFIG_KEY: &str = "sync_config";

pub const MIN_SYNC_INTERVAL_MINUTES: u64 = 1;
pub const MAX_SYNC_INTERVAL_MINUTES: u64 = 1440;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("conflict error: {0}")]
    Conflict(#[from] ConflictError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

// ============================================================================
// Config
// ============================================================================

/// Persisted sync settings, stored as one JSON blob in the settings table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub device_id: String,
    pub device_name: String,
    pub endpoint: String,
    pub tier: PrivacyTier,
    pub consented_at: Option<DateTime<Utc>>,
    pub auto_sync_minutes: u64,
}

impl SyncConfig {
    fn bootstrap() -> Self {
        let device_name = hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "unknown-device".to_string());

        Self {
            device_id: uuid::Uuid::new_v4().to_string(),
            device_name,
            endpoint: String::new(),
            tier: PrivacyTier::LocalOnly,
            consented_at: None,
            auto_sync_minutes: 15,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct SyncEngine {
    db: Arc<Database>,
    api: Arc<dyn RemoteApi>,
    keys: Arc<KeyManager>,
    queue: Arc<SyncQueue>,
    orchestrator: TierOrchestrator,
    processor: QueueProcessor,
    conflicts: ConflictManager,
    config: RwLock<SyncConfig>,
}

impl SyncEngine {
    /// Wires the full sync stack over an open database. Loads the persisted
    /// config, minting a device identity on first run.
    pub fn new(
        db: Arc<Database>,
        api: Arc<dyn RemoteApi>,
        keys: Arc<KeyManager>,
    ) -> EngineResult<Self> {
        let config = match db.get_setting::<SyncConfig>(CONFIG_KEY)? {
            Some(config) => config,
            None => {
                let config = SyncConfig::bootstrap();
                db.set_setting(CONFIG_KEY, &config)?;
                log::info!("sync config bootstrapped for device {}", config.device_id);
                config
            }
        };

        let queue = Arc::new(SyncQueue::new(db.clone())?);
        let orchestrator = TierOrchestrator::new(
            db.clone(),
            Arc::clone(&api),
            Arc::clone(&keys),
            Arc::clone(&queue),
        );
        let processor = QueueProcessor::new(Arc::clone(&queue), Arc::clone(&api));
        let conflicts = ConflictManager::new(db.clone(), Arc::clone(&api), Arc::clone(&keys))?;

        Ok(Self {
            db,
            api,
            keys,
            queue,
            orchestrator,
            processor,
            conflicts,
            config: RwLock::new(config),
        })
    }

    pub async fn config(&self) -> SyncConfig {
        self.config.read().await.clone()
    }

    pub async fn current_tier(&self) -> PrivacyTier {
        self.config.read().await.tier
    }

    /// Runs the tier transition and, when it succeeds (including a deferred
    /// upgrade), records the new tier and consent time. A failed transition
    /// leaves the stored tier unchanged.
    pub async fn set_privacy_tier(
        &self,
        new_tier: PrivacyTier,
        on_progress: Option<&ProgressFn>,
    ) -> EngineResult<TierTransitionResult> {
        let old_tier = self.current_tier().await;
        let result = self.orchestrator.transition(old_tier, new_tier, on_progress).await;

        if result.success && old_tier != new_tier {
            let mut config = self.config.write().await;
            config.tier = new_tier;
            config.consented_at = Some(Utc::now());
            self.db.set_setting(CONFIG_KEY, &*config)?;
        }

        Ok(result)
    }

    /// Queues one entry mutation for later delivery. Content tier only; at
    /// lower tiers entry content never leaves the device and there is
    /// nothing to queue. Content is encrypted at enqueue time so the queue
    /// never holds plaintext.
    pub async fn queue_entry_mutation(&self, op: SyncOp, entry_id: &str) -> EngineResult<Option<i64>> {
        if self.current_tier().await != PrivacyTier::FullSync {
            return Ok(None);
        }

        let payload = match op {
            SyncOp::Delete => "{}".to_string(),
            SyncOp::Create | SyncOp::Update => {
                let entry = self.db.get_entry(entry_id)?;
                let key = self
                    .keys
                    .symmetric_key()
                    .ok_or(CryptoError::MissingKey)?;
                let encrypted = encrypt_content(&key, &entry.content)?;
                serde_json::to_string(&serde_json::json!({
                    "id": entry.id,
                    "ciphertext": encrypted.ciphertext,
                    "iv": encrypted.iv,
                    "tag": encrypted.tag,
                    "created_at": entry.created_at,
                    "updated_at": entry.updated_at,
                    "device_id": entry.device_id,
                }))
                .map_err(|e| EngineError::Config(e.to_string()))?
            }
        };

        let id = self.queue.enqueue(op, ENTRIES_COLLECTION, entry_id, &payload)?;
        Ok(Some(id))
    }

    /// One best-effort drain of the offline queue.
    pub async fn process_queue(&self) -> EngineResult<ProcessOutcome> {
        Ok(self.processor.process().await?)
    }

    pub fn queue_status(&self) -> EngineResult<QueueStatus> {
        Ok(self.queue.status()?)
    }

    pub async fn refresh_conflicts(&self) -> EngineResult<Vec<Conflict>> {
        Ok(self.conflicts.fetch_from_backend().await?)
    }

    pub fn local_conflicts(&self) -> EngineResult<Vec<Conflict>> {
        Ok(self.conflicts.local_conflicts()?)
    }

    pub fn decrypt_conflict(&self, conflict: &Conflict) -> EngineResult<DecryptedConflict> {
        Ok(self.conflicts.decrypt(conflict)?)
    }

    pub async fn resolve_conflict(
        &self,
        id: &str,
        choice: ResolutionChoice,
        merged_content: Option<&str>,
    ) -> EngineResult<()> {
        Ok(self.conflicts.resolve(id, choice, merged_content).await?)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.api.has_token().await
    }

    pub async fn set_auto_sync_minutes(&self, minutes: u64) -> EngineResult<()> {
        if !(MIN_SYNC_INTERVAL_MINUTES..=MAX_SYNC_INTERVAL_MINUTES).contains(&minutes) {
            return Err(EngineError::Config(format!(
                "sync interval must be between {} and {} minutes",
                MIN_SYNC_INTERVAL_MINUTES, MAX_SYNC_INTERVAL_MINUTES
            )));
        }
        let mut config = self.config.write().await;
        config.auto_sync_minutes = minutes;
        self.db.set_setting(CONFIG_KEY, &*config)?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
