//! Privacy tier transitions
//!
//! Moving between privacy tiers is a fixed, auditable sequence of steps,
//! derived from an explicit table over every ordered tier pair rather than
//! scattered conditionals. Upgrades push data up; downgrades delete it and
//! clear the matching slice of the offline queue. All failure detail lands
//! in the returned [`TierTransitionResult`]; the call itself never errors.

use std::sync::Arc;

use chrono::Utc;

use crate::crypto::{encrypt_content, KeyManager, MetricKind, SENTIMENT_SCALE};
use crate::db::{Database, EntryMetrics, JournalEntry};

use super::api::{ApiResult, RemoteApi, SetTierRequest, SyncApiError, UploadRecordRequest};
use super::batch::{run_best_effort, BatchItemError};
use super::models::{
    EncryptedMetric, PrivacyTier, ProgressFn, QueueScope, TierTransitionResult,
    TransitionProgress,
};
use super::queue::SyncQueue;

// ============================================================================
// Transition table
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionStep {
    /// Record the new tier (and consent) server-side before data moves.
    PushTierToServer,
    UploadMetrics,
    UploadContent,
    DeleteContent,
    DeleteMetrics,
    DeleteAll,
    ClearQueue(QueueScope),
}

/// The full plan for one tier change. Exhaustive over every ordered pair so
/// adding a tier forces every case to be revisited.
pub fn transition_steps(old: PrivacyTier, new: PrivacyTier) -> Vec<TransitionStep> {
    use PrivacyTier::*;
    use TransitionStep::*;

    match (old, new) {
        (LocalOnly, LocalOnly) | (AnalyticsSync, AnalyticsSync) | (FullSync, FullSync) => {
            vec![]
        }
        (LocalOnly, AnalyticsSync) => vec![PushTierToServer, UploadMetrics],
        (LocalOnly, FullSync) => vec![PushTierToServer, UploadMetrics, UploadContent],
        // Metrics are already on the server at AnalyticsSync.
        (AnalyticsSync, FullSync) => vec![PushTierToServer, UploadContent],
        (FullSync, AnalyticsSync) => vec![
            PushTierToServer,
            DeleteContent,
            ClearQueue(QueueScope::ContentOnly),
        ],
        (FullSync, LocalOnly) => vec![DeleteAll, ClearQueue(QueueScope::All)],
        (AnalyticsSync, LocalOnly) => vec![DeleteMetrics, ClearQueue(QueueScope::All)],
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct TierOrchestrator {
    db: Arc<Database>,
    api: Arc<dyn RemoteApi>,
    keys: Arc<KeyManager>,
    queue: Arc<SyncQueue>,
}

impl TierOrchestrator {
    pub fn new(
        db: Arc<Database>,
        api: Arc<dyn RemoteApi>,
        keys: Arc<KeyManager>,
        queue: Arc<SyncQueue>,
    ) -> Self {
        Self {
            db,
            api,
            keys,
            queue,
        }
    }

    /// Executes the transition plan for `old -> new`.
    ///
    /// Upgrades without an auth token skip all server work and report a
    /// deferred success; downgrades without a token still clear the local
    /// queue. A `PushTierToServer` failure aborts the remaining steps. Bulk
    /// steps run best-effort and re-running after a partial failure is safe:
    /// uploads upsert by record id and deletions tolerate 404.
    pub async fn transition(
        &self,
        old: PrivacyTier,
        new: PrivacyTier,
        on_progress: Option<&ProgressFn>,
    ) -> TierTransitionResult {
        if old == new {
            return TierTransitionResult::ok(0);
        }

        let upgrade = new > old;
        let steps = transition_steps(old, new);
        let has_token = self.api.has_token().await;

        log::info!(
            "tier transition {} -> {} ({} step(s), token: {})",
            old.as_str(),
            new.as_str(),
            steps.len(),
            has_token
        );

        if upgrade && !has_token {
            log::info!("not authenticated; deferring upgrade until sign-in");
            return TierTransitionResult::deferred();
        }

        if upgrade
            && steps.contains(&TransitionStep::UploadContent)
            && !self.keys.has_symmetric_key()
        {
            return TierTransitionResult::fatal(
                "content encryption key unavailable; cannot enter full sync".to_string(),
            );
        }

        let mut processed = 0usize;
        let mut errors: Vec<String> = Vec::new();

        for step in steps {
            // Without a token only the local queue clear is possible.
            if !has_token && !matches!(step, TransitionStep::ClearQueue(_)) {
                continue;
            }

            match step {
                TransitionStep::PushTierToServer => {
                    if let Err(err) = self.push_tier(new).await {
                        log::error!("tier push rejected: {}", err);
                        errors.push(format!("tier push rejected: {}", err));
                        return TierTransitionResult::from_counts(processed, errors);
                    }
                }
                TransitionStep::UploadMetrics => {
                    let (uploaded, step_errors) = self.upload_metrics(on_progress).await;
                    processed += uploaded;
                    errors.extend(step_errors);
                }
                TransitionStep::UploadContent => {
                    let (uploaded, step_errors) = self.upload_content(on_progress).await;
                    processed += uploaded;
                    errors.extend(step_errors);
                }
                TransitionStep::DeleteContent => {
                    match self.deletion(self.api.delete_encrypted_content().await) {
                        Ok(()) => {
                            processed += 1;
                            if let Err(err) =
                                self.db.execute("UPDATE entries SET needs_sync = 1", [])
                            {
                                errors.push(format!("resetting sync flags: {}", err));
                            }
                        }
                        Err(err) => errors.push(format!("content deletion: {}", err)),
                    }
                }
                TransitionStep::DeleteMetrics => {
                    match self.deletion(self.api.delete_all_metrics().await) {
                        Ok(()) => processed += 1,
                        Err(err) => errors.push(format!("metrics deletion: {}", err)),
                    }
                }
                TransitionStep::DeleteAll => {
                    match self.deletion(self.api.delete_all_user_data().await) {
                        Ok(()) => {
                            processed += 1;
                            if let Err(err) =
                                self.db.execute("UPDATE entries SET needs_sync = 1", [])
                            {
                                errors.push(format!("resetting sync flags: {}", err));
                            }
                        }
                        Err(err) => errors.push(format!("account data deletion: {}", err)),
                    }
                }
                TransitionStep::ClearQueue(scope) => {
                    if let Err(err) = self.queue.clear(scope) {
                        errors.push(format!("clearing sync queue: {}", err));
                    }
                }
            }
        }

        let result = TierTransitionResult::from_counts(processed, errors);
        log::info!(
            "tier transition {} -> {} finished: processed {}, failed {}",
            old.as_str(),
            new.as_str(),
            result.processed,
            result.failed
        );
        result
    }

    async fn push_tier(&self, new: PrivacyTier) -> ApiResult<()> {
        // Server-visible tiers aggregate metrics; make sure the metric keys
        // exist so the public context can travel with the tier change.
        let metric_public_key = if new.requires_server() {
            if self.keys.metric_cipher().is_none() {
                self.keys
                    .generate_metric_keys()
                    .map_err(|e| SyncApiError::Request(e.to_string()))?;
            }
            self.keys.metric_public_context()
        } else {
            None
        };

        self.api
            .set_privacy_tier(SetTierRequest {
                tier: new.as_str().to_string(),
                consented_at: Utc::now(),
                metric_public_key,
            })
            .await
    }

    /// Encrypts every entry's numeric metrics and ships them in one batch.
    /// Returns (records uploaded, errors).
    async fn upload_metrics(&self, on_progress: Option<&ProgressFn>) -> (usize, Vec<String>) {
        let records: Vec<EntryMetrics> = match self.db.get_entry_metrics() {
            Ok(records) => records,
            Err(err) => return (0, vec![format!("loading metrics: {}", err)]),
        };
        if records.is_empty() {
            return (0, Vec::new());
        }

        let cipher = match self.keys.metric_cipher() {
            Some(cipher) => cipher,
            None => return (0, vec!["metric encryption keys unavailable".to_string()]),
        };

        let total = records.len();
        let now = Utc::now();
        let mut batch = Vec::with_capacity(total * 2);
        for (index, record) in records.iter().enumerate() {
            report(on_progress, index + 1, total, "encrypting metrics");
            let sentiment = (record.sentiment_score * SENTIMENT_SCALE).round() as i64;
            batch.push(EncryptedMetric {
                record_id: record.id.clone(),
                metric_type: MetricKind::WordCount,
                value: cipher.encrypt(&record.id, MetricKind::WordCount, record.word_count),
                timestamp: now,
            });
            batch.push(EncryptedMetric {
                record_id: record.id.clone(),
                metric_type: MetricKind::Sentiment,
                value: cipher.encrypt(&record.id, MetricKind::Sentiment, sentiment),
                timestamp: now,
            });
        }

        match self.api.upload_encrypted_metrics(batch).await {
            Ok(()) => (total, Vec::new()),
            Err(err) => (0, vec![format!("metrics upload: {}", err)]),
        }
    }

    /// Encrypts and uploads every entry, upserting by id. Best-effort; one
    /// failed entry does not stop the rest.
    async fn upload_content(&self, on_progress: Option<&ProgressFn>) -> (usize, Vec<String>) {
        let entries: Vec<JournalEntry> = match self.db.get_all_entries() {
            Ok(entries) => entries,
            Err(err) => return (0, vec![format!("loading entries: {}", err)]),
        };

        let key = match self.keys.symmetric_key() {
            Some(key) => key,
            None => return (0, vec!["content encryption key unavailable".to_string()]),
        };

        let api = Arc::clone(&self.api);
        let db = self.db.clone();

        let outcome = run_best_effort(
            entries,
            move |entry| {
                let api = Arc::clone(&api);
                let db = db.clone();
                let key = Arc::clone(&key);
                async move {
                    let encrypted = encrypt_content(&key, &entry.content)
                        .map_err(|e| BatchItemError::new(entry.id.clone(), e.to_string()))?;

                    api.upload_encrypted_record(UploadRecordRequest {
                        id: entry.id.clone(),
                        ciphertext: encrypted.ciphertext,
                        iv: encrypted.iv,
                        tag: encrypted.tag,
                        created_at: entry.created_at,
                        updated_at: entry.updated_at,
                        device_id: entry.device_id.clone(),
                    })
                    .await
                    .map_err(|e| BatchItemError::new(entry.id.clone(), e.to_string()))?;

                    db.mark_entry_synced(&entry.id, true)
                        .map_err(|e| BatchItemError::new(entry.id.clone(), e.to_string()))
                }
            },
            |current, total| report(on_progress, current, total, "uploading entries"),
        )
        .await;

        let errors = outcome.errors.iter().map(|e| e.to_string()).collect();
        (outcome.processed, errors)
    }

    /// A deletion that finds nothing on the server is already done.
    fn deletion(&self, result: ApiResult<()>) -> ApiResult<()> {
        match result {
            Err(SyncApiError::NotFound) => Ok(()),
            other => other,
        }
    }
}

fn report(on_progress: Option<&ProgressFn>, current: usize, total: usize, operation: &str) {
    if let Some(callback) = on_progress {
        callback(TransitionProgress {
            current,
            total,
            operation: operation.to_string(),
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
