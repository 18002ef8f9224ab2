//! Sync integration tests
//!
//! End-to-end scenarios over the tier orchestrator, queue processor and
//! conflict manager, run against an in-memory remote store with injectable
//! failures.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::crypto::{decrypt_parts, KeyManager};
use crate::db::{Database, JournalEntry};

use super::api::{
    ApiResult, RemoteApi, ResolveConflictRequest, SetTierRequest, SyncApiError,
    UploadRecordRequest,
};
use super::conflict::{ConflictError, ConflictManager};
use super::engine::SyncEngine;
use super::models::{
    Conflict, ConflictVersion, EncryptedMetric, PrivacyTier, ResolutionChoice, SyncOp,
    TransitionProgress, ENTRIES_COLLECTION,
};
use super::queue::{QueueProcessor, SyncQueue};
use super::tier::TierOrchestrator;

// ============================================================================
// In-memory remote store
// ============================================================================

#[derive(Default)]
struct RemoteState {
    authed: bool,
    tier: Option<String>,
    tier_pushes: usize,
    records: HashMap<String, UploadRecordRequest>,
    metrics: Vec<EncryptedMetric>,
    conflicts: Vec<Conflict>,
    resolutions: Vec<(String, ResolveConflictRequest)>,
    mutations: Vec<(SyncOp, String, String)>,
    delete_content_calls: usize,
    delete_metrics_calls: usize,
    delete_all_calls: usize,
    // failure injection
    fail_tier_push: bool,
    fail_metrics_upload: bool,
    fail_uploads_for: HashSet<String>,
    fail_mutations_for: HashSet<String>,
    fail_resolve: bool,
    deletes_return_not_found: bool,
}

#[derive(Default)]
struct InMemoryRemote {
    state: StdMutex<RemoteState>,
}

impl InMemoryRemote {
    fn authed() -> Self {
        let remote = Self::default();
        remote.state.lock().unwrap().authed = true;
        remote
    }

    fn with<R>(&self, f: impl FnOnce(&mut RemoteState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn server_error() -> SyncApiError {
        SyncApiError::Server {
            status: 500,
            message: "injected failure".to_string(),
        }
    }
}

#[async_trait]
impl RemoteApi for InMemoryRemote {
    async fn has_token(&self) -> bool {
        self.with(|s| s.authed)
    }

    async fn set_privacy_tier(&self, req: SetTierRequest) -> ApiResult<()> {
        self.with(|s| {
            if !s.authed {
                return Err(SyncApiError::Unauthorized);
            }
            if s.fail_tier_push {
                return Err(InMemoryRemote::server_error());
            }
            s.tier = Some(req.tier);
            s.tier_pushes += 1;
            Ok(())
        })
    }

    async fn upload_encrypted_record(&self, req: UploadRecordRequest) -> ApiResult<()> {
        self.with(|s| {
            if !s.authed {
                return Err(SyncApiError::Unauthorized);
            }
            if s.fail_uploads_for.contains(&req.id) {
                return Err(InMemoryRemote::server_error());
            }
            s.records.insert(req.id.clone(), req);
            Ok(())
        })
    }

    async fn upload_encrypted_metrics(&self, metrics: Vec<EncryptedMetric>) -> ApiResult<()> {
        self.with(|s| {
            if !s.authed {
                return Err(SyncApiError::Unauthorized);
            }
            if s.fail_metrics_upload {
                return Err(InMemoryRemote::server_error());
            }
            s.metrics.extend(metrics);
            Ok(())
        })
    }

    async fn delete_all_user_data(&self) -> ApiResult<()> {
        self.with(|s| {
            if !s.authed {
                return Err(SyncApiError::Unauthorized);
            }
            s.delete_all_calls += 1;
            if s.deletes_return_not_found {
                return Err(SyncApiError::NotFound);
            }
            s.records.clear();
            s.metrics.clear();
            s.tier = None;
            Ok(())
        })
    }

    async fn delete_encrypted_content(&self) -> ApiResult<()> {
        self.with(|s| {
            if !s.authed {
                return Err(SyncApiError::Unauthorized);
            }
            s.delete_content_calls += 1;
            if s.deletes_return_not_found {
                return Err(SyncApiError::NotFound);
            }
            s.records.clear();
            Ok(())
        })
    }

    async fn delete_all_metrics(&self) -> ApiResult<()> {
        self.with(|s| {
            if !s.authed {
                return Err(SyncApiError::Unauthorized);
            }
            s.delete_metrics_calls += 1;
            if s.deletes_return_not_found {
                return Err(SyncApiError::NotFound);
            }
            s.metrics.clear();
            Ok(())
        })
    }

    async fn list_conflicts(&self) -> ApiResult<Vec<Conflict>> {
        self.with(|s| {
            if !s.authed {
                return Err(SyncApiError::Unauthorized);
            }
            Ok(s.conflicts.clone())
        })
    }

    async fn resolve_conflict(
        &self,
        conflict_id: &str,
        _choice: ResolutionChoice,
        req: ResolveConflictRequest,
    ) -> ApiResult<()> {
        self.with(|s| {
            if !s.authed {
                return Err(SyncApiError::Unauthorized);
            }
            if s.fail_resolve {
                return Err(InMemoryRemote::server_error());
            }
            s.conflicts.retain(|c| c.id != conflict_id);
            s.resolutions.push((conflict_id.to_string(), req));
            Ok(())
        })
    }

    async fn push_mutation(
        &self,
        op: SyncOp,
        collection: &str,
        record_id: &str,
        _payload: &str,
    ) -> ApiResult<()> {
        self.with(|s| {
            if !s.authed {
                return Err(SyncApiError::Unauthorized);
            }
            if s.fail_mutations_for.contains(record_id) {
                return Err(InMemoryRemote::server_error());
            }
            s.mutations
                .push((op, collection.to_string(), record_id.to_string()));
            Ok(())
        })
    }
}

// ============================================================================
// Fixtures
// ============================================================================

struct TestEnv {
    db: Arc<Database>,
    remote: Arc<InMemoryRemote>,
    keys: Arc<KeyManager>,
    queue: Arc<SyncQueue>,
    orchestrator: TierOrchestrator,
}

fn setup(authed: bool) -> TestEnv {
    let db = Arc::new(Database::in_memory().unwrap());
    let remote = Arc::new(if authed {
        InMemoryRemote::authed()
    } else {
        InMemoryRemote::default()
    });
    let keys = Arc::new(KeyManager::new());
    let queue = Arc::new(SyncQueue::new(db.clone()).unwrap());
    let orchestrator = TierOrchestrator::new(
        db.clone(),
        remote.clone(),
        Arc::clone(&keys),
        Arc::clone(&queue),
    );
    TestEnv {
        db,
        remote,
        keys,
        queue,
        orchestrator,
    }
}

fn seed_entries(db: &Database, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let entry = JournalEntry::new(
                format!("journal entry number {} with a few words", i),
                0.25 * i as f64,
                "laptop".to_string(),
            );
            db.upsert_entry(&entry).unwrap();
            entry.id
        })
        .collect()
}

fn encrypted_conflict(keys: &KeyManager, id: &str, local: &str, remote: &str) -> Conflict {
    let key = keys.symmetric_key().unwrap();
    let make = |content: &str, device: &str| {
        let enc = crate::crypto::encrypt_content(&key, content).unwrap();
        ConflictVersion {
            ciphertext: enc.ciphertext,
            iv: enc.iv,
            tag: Some(enc.tag),
            modified_at: Utc::now(),
            device_id: device.to_string(),
        }
    };
    Conflict {
        id: id.to_string(),
        record_id: format!("entry-for-{}", id),
        detected_at: Utc::now(),
        local: make(local, "laptop"),
        remote: make(remote, "phone"),
    }
}

// ============================================================================
// Tier transitions
// ============================================================================

#[tokio::test]
async fn test_upgrade_without_token_is_deferred() {
    let env = setup(false);
    seed_entries(&env.db, 2);
    env.keys.generate_symmetric_key().unwrap();

    let result = env
        .orchestrator
        .transition(PrivacyTier::LocalOnly, PrivacyTier::FullSync, None)
        .await;

    assert!(result.success);
    assert!(result.deferred);
    assert_eq!(result.processed, 0);
    assert_eq!(result.failed, 0);
    env.remote.with(|s| {
        assert!(s.tier.is_none());
        assert!(s.records.is_empty());
        assert!(s.metrics.is_empty());
    });
}

#[tokio::test]
async fn test_analytics_upgrade_uploads_masked_metrics() {
    let env = setup(true);
    seed_entries(&env.db, 3);

    let result = env
        .orchestrator
        .transition(PrivacyTier::LocalOnly, PrivacyTier::AnalyticsSync, None)
        .await;

    assert!(result.success);
    assert!(!result.deferred);
    assert_eq!(result.processed, 3);
    env.remote.with(|s| {
        assert_eq!(s.tier.as_deref(), Some("analytics_sync"));
        // two ciphertexts per record, never plaintext content
        assert_eq!(s.metrics.len(), 6);
        assert!(s.records.is_empty());
    });
}

#[tokio::test]
async fn test_full_upgrade_uploads_metrics_then_content() {
    let env = setup(true);
    let ids = seed_entries(&env.db, 2);
    env.keys.generate_symmetric_key().unwrap();

    let result = env
        .orchestrator
        .transition(PrivacyTier::LocalOnly, PrivacyTier::FullSync, None)
        .await;

    assert!(result.success);
    assert_eq!(result.processed, 4); // 2 metric records + 2 content records
    env.remote.with(|s| {
        assert_eq!(s.records.len(), 2);
        assert_eq!(s.metrics.len(), 4);
        for id in &ids {
            let record = &s.records[id];
            assert!(!record.ciphertext.is_empty());
            assert!(!record.tag.is_empty());
        }
    });

    // local entries marked clean
    for entry in env.db.get_all_entries().unwrap() {
        assert!(!entry.needs_sync);
    }
}

#[tokio::test]
async fn test_upgrade_rerun_is_idempotent() {
    let env = setup(true);
    seed_entries(&env.db, 3);
    env.keys.generate_symmetric_key().unwrap();

    for _ in 0..2 {
        let result = env
            .orchestrator
            .transition(PrivacyTier::AnalyticsSync, PrivacyTier::FullSync, None)
            .await;
        assert!(result.success);
    }

    // uploads upsert by id; re-running never duplicates records
    env.remote.with(|s| assert_eq!(s.records.len(), 3));
}

#[tokio::test]
async fn test_full_upgrade_without_symmetric_key_is_fatal() {
    let env = setup(true);
    seed_entries(&env.db, 2);

    let result = env
        .orchestrator
        .transition(PrivacyTier::AnalyticsSync, PrivacyTier::FullSync, None)
        .await;

    assert!(!result.success);
    assert_eq!(result.processed, 0);
    assert_eq!(result.failed, 1);
    // aborted before any server call
    env.remote.with(|s| {
        assert_eq!(s.tier_pushes, 0);
        assert!(s.records.is_empty());
    });
}

#[tokio::test]
async fn test_partial_upload_failures_are_accounted() {
    let env = setup(true);
    let ids = seed_entries(&env.db, 5);
    env.keys.generate_symmetric_key().unwrap();
    env.remote.with(|s| {
        s.fail_uploads_for.insert(ids[1].clone());
        s.fail_uploads_for.insert(ids[3].clone());
    });

    let result = env
        .orchestrator
        .transition(PrivacyTier::AnalyticsSync, PrivacyTier::FullSync, None)
        .await;

    assert!(!result.success);
    assert_eq!(result.processed, 3);
    assert_eq!(result.failed, 2);
    assert_eq!(result.processed + result.failed, 5);
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors.iter().any(|e| e.contains(&ids[1])));
    env.remote.with(|s| assert_eq!(s.records.len(), 3));
}

#[tokio::test]
async fn test_tier_push_failure_aborts_transition() {
    let env = setup(true);
    seed_entries(&env.db, 3);
    env.remote.with(|s| s.fail_tier_push = true);

    let result = env
        .orchestrator
        .transition(PrivacyTier::LocalOnly, PrivacyTier::AnalyticsSync, None)
        .await;

    assert!(!result.success);
    assert_eq!(result.processed, 0);
    assert!(result.errors[0].contains("tier push rejected"));
    env.remote.with(|s| assert!(s.metrics.is_empty()));
}

#[tokio::test]
async fn test_downgrade_full_to_analytics_deletes_content_and_scoped_queue() {
    let env = setup(true);
    env.queue
        .enqueue(SyncOp::Update, ENTRIES_COLLECTION, "e-1", "{}")
        .unwrap();
    env.queue
        .enqueue(SyncOp::Update, "tags", "t-1", "{}")
        .unwrap();

    let result = env
        .orchestrator
        .transition(PrivacyTier::FullSync, PrivacyTier::AnalyticsSync, None)
        .await;

    assert!(result.success);
    assert_eq!(result.processed, 1); // one content deletion call
    env.remote.with(|s| {
        assert_eq!(s.delete_content_calls, 1);
        assert_eq!(s.tier.as_deref(), Some("analytics_sync"));
    });

    // only content-bound queue items were dropped
    let remaining = env.queue.pending_items().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].collection, "tags");
}

#[tokio::test]
async fn test_downgrade_full_to_local_deletes_everything() {
    let env = setup(true);
    env.queue
        .enqueue(SyncOp::Update, ENTRIES_COLLECTION, "e-1", "{}")
        .unwrap();
    env.queue
        .enqueue(SyncOp::Update, "tags", "t-1", "{}")
        .unwrap();

    let result = env
        .orchestrator
        .transition(PrivacyTier::FullSync, PrivacyTier::LocalOnly, None)
        .await;

    assert!(result.success);
    assert_eq!(result.processed, 1); // one delete-all call
    env.remote.with(|s| {
        assert_eq!(s.delete_all_calls, 1);
        assert_eq!(s.tier_pushes, 0);
    });
    assert!(env.queue.pending_items().unwrap().is_empty());
}

#[tokio::test]
async fn test_downgrade_analytics_to_local_deletes_metrics() {
    let env = setup(true);

    let result = env
        .orchestrator
        .transition(PrivacyTier::AnalyticsSync, PrivacyTier::LocalOnly, None)
        .await;

    assert!(result.success);
    assert_eq!(result.processed, 1);
    env.remote.with(|s| {
        assert_eq!(s.delete_metrics_calls, 1);
        assert_eq!(s.delete_all_calls, 0);
    });
}

#[tokio::test]
async fn test_delete_not_found_counts_as_done() {
    let env = setup(true);
    env.remote.with(|s| s.deletes_return_not_found = true);

    let result = env
        .orchestrator
        .transition(PrivacyTier::FullSync, PrivacyTier::LocalOnly, None)
        .await;

    assert!(result.success);
    assert_eq!(result.processed, 1);
    assert_eq!(result.failed, 0);
}

#[tokio::test]
async fn test_downgrade_without_token_still_clears_queue() {
    let env = setup(false);
    env.queue
        .enqueue(SyncOp::Update, ENTRIES_COLLECTION, "e-1", "{}")
        .unwrap();

    let result = env
        .orchestrator
        .transition(PrivacyTier::FullSync, PrivacyTier::LocalOnly, None)
        .await;

    assert!(result.success);
    assert_eq!(result.processed, 0);
    env.remote.with(|s| assert_eq!(s.delete_all_calls, 0));
    assert!(env.queue.pending_items().unwrap().is_empty());
}

#[tokio::test]
async fn test_same_tier_transition_is_noop() {
    let env = setup(true);
    seed_entries(&env.db, 2);

    let result = env
        .orchestrator
        .transition(PrivacyTier::FullSync, PrivacyTier::FullSync, None)
        .await;

    assert!(result.success);
    assert_eq!(result.processed, 0);
    env.remote.with(|s| assert_eq!(s.tier_pushes, 0));
}

#[tokio::test]
async fn test_progress_reported_during_uploads() {
    let env = setup(true);
    seed_entries(&env.db, 3);
    env.keys.generate_symmetric_key().unwrap();

    let seen: Arc<StdMutex<Vec<TransitionProgress>>> = Arc::new(StdMutex::new(Vec::new()));
    let sink = seen.clone();
    let callback = move |progress: TransitionProgress| {
        sink.lock().unwrap().push(progress);
    };

    let result = env
        .orchestrator
        .transition(PrivacyTier::LocalOnly, PrivacyTier::FullSync, Some(&callback))
        .await;
    assert!(result.success);

    let seen = seen.lock().unwrap();
    // 3 metric encryptions + 3 content uploads
    assert_eq!(seen.len(), 6);
    assert!(seen.iter().all(|p| p.total == 3 && p.current >= 1 && p.current <= 3));
    assert!(seen.iter().any(|p| p.operation.contains("metrics")));
    assert!(seen.iter().any(|p| p.operation.contains("entries")));
}

// ============================================================================
// Queue drain
// ============================================================================

#[tokio::test]
async fn test_queue_drain_is_best_effort_and_retains_failures() {
    let env = setup(true);
    env.queue
        .enqueue(SyncOp::Create, ENTRIES_COLLECTION, "e-1", "{}")
        .unwrap();
    env.queue
        .enqueue(SyncOp::Update, ENTRIES_COLLECTION, "e-2", "{}")
        .unwrap();
    env.queue
        .enqueue(SyncOp::Delete, ENTRIES_COLLECTION, "e-3", "{}")
        .unwrap();
    env.remote
        .with(|s| s.fail_mutations_for.insert("e-2".to_string()));

    let processor = QueueProcessor::new(Arc::clone(&env.queue), env.remote.clone());

    let outcome = processor.process().await.unwrap();
    assert_eq!(outcome.processed, 2);
    assert_eq!(outcome.failed, 1);

    let remaining = env.queue.pending_items().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].record_id, "e-2");
    assert_eq!(remaining[0].attempts, 1);

    // failure cleared server-side; the retained item drains on the next pass
    env.remote.with(|s| s.fail_mutations_for.clear());
    let outcome = processor.process().await.unwrap();
    assert_eq!(outcome.processed, 1);
    assert!(env.queue.pending_items().unwrap().is_empty());
}

#[tokio::test]
async fn test_queue_drain_skips_when_signed_out() {
    let env = setup(false);
    env.queue
        .enqueue(SyncOp::Create, ENTRIES_COLLECTION, "e-1", "{}")
        .unwrap();
    let processor = QueueProcessor::new(Arc::clone(&env.queue), env.remote.clone());

    let outcome = processor.process().await.unwrap();
    assert_eq!(outcome.processed, 0);
    assert_eq!(outcome.failed, 0);

    let remaining = env.queue.pending_items().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].attempts, 0);
}

#[tokio::test]
async fn test_queue_preserves_order_across_drains() {
    let env = setup(true);
    for i in 0..4 {
        env.queue
            .enqueue(
                SyncOp::Update,
                ENTRIES_COLLECTION,
                &format!("e-{}", i),
                "{}",
            )
            .unwrap();
    }
    let processor = QueueProcessor::new(Arc::clone(&env.queue), env.remote.clone());
    processor.process().await.unwrap();

    env.remote.with(|s| {
        let ids: Vec<&str> = s.mutations.iter().map(|(_, _, id)| id.as_str()).collect();
        assert_eq!(ids, vec!["e-0", "e-1", "e-2", "e-3"]);
    });
}

// ============================================================================
// Conflicts
// ============================================================================

#[tokio::test]
async fn test_conflict_fetch_replaces_mirror() {
    let env = setup(true);
    env.keys.generate_symmetric_key().unwrap();
    let manager =
        ConflictManager::new(env.db.clone(), env.remote.clone(), Arc::clone(&env.keys)).unwrap();

    let first = encrypted_conflict(&env.keys, "c-1", "local text", "remote text");
    env.remote.with(|s| s.conflicts = vec![first]);
    let fetched = manager.fetch_from_backend().await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(manager.local_conflicts().unwrap().len(), 1);

    // server list changed; mirror follows it exactly
    let second = encrypted_conflict(&env.keys, "c-2", "a", "b");
    env.remote.with(|s| s.conflicts = vec![second]);
    manager.fetch_from_backend().await.unwrap();

    let mirrored = manager.local_conflicts().unwrap();
    assert_eq!(mirrored.len(), 1);
    assert_eq!(mirrored[0].id, "c-2");
}

#[tokio::test]
async fn test_conflict_fetch_requires_auth() {
    let env = setup(false);
    let manager =
        ConflictManager::new(env.db.clone(), env.remote.clone(), Arc::clone(&env.keys)).unwrap();
    assert!(matches!(
        manager.fetch_from_backend().await,
        Err(ConflictError::AuthRequired)
    ));
}

#[tokio::test]
async fn test_conflict_decrypt_roundtrip_through_mirror() {
    let env = setup(true);
    env.keys.generate_symmetric_key().unwrap();
    let manager =
        ConflictManager::new(env.db.clone(), env.remote.clone(), Arc::clone(&env.keys)).unwrap();

    let conflict = encrypted_conflict(
        &env.keys,
        "c-1",
        "wrote this on the laptop",
        "wrote this later on the phone instead",
    );
    env.remote.with(|s| s.conflicts = vec![conflict]);
    manager.fetch_from_backend().await.unwrap();

    let mirrored = manager.get_local("c-1").unwrap();
    let decrypted = manager.decrypt(&mirrored).unwrap();
    assert_eq!(decrypted.local.content, "wrote this on the laptop");
    assert_eq!(decrypted.local.word_count, 5);
    assert_eq!(decrypted.remote.word_count, 7);
}

#[tokio::test]
async fn test_resolve_local_clears_mirror_and_notifies_server() {
    let env = setup(true);
    env.keys.generate_symmetric_key().unwrap();
    let manager =
        ConflictManager::new(env.db.clone(), env.remote.clone(), Arc::clone(&env.keys)).unwrap();

    let conflict = encrypted_conflict(&env.keys, "c-1", "mine", "theirs");
    env.remote.with(|s| s.conflicts = vec![conflict]);
    manager.fetch_from_backend().await.unwrap();

    manager
        .resolve("c-1", ResolutionChoice::Local, None)
        .await
        .unwrap();

    assert!(manager.local_conflicts().unwrap().is_empty());
    assert!(manager.fetch_from_backend().await.unwrap().is_empty());
    env.remote.with(|s| {
        assert_eq!(s.resolutions.len(), 1);
        let (id, req) = &s.resolutions[0];
        assert_eq!(id, "c-1");
        assert_eq!(req.chosen_version, "local");
        assert!(req.final_ciphertext.is_none());
    });
}

#[tokio::test]
async fn test_resolve_merged_sends_fresh_ciphertext() {
    let env = setup(true);
    env.keys.generate_symmetric_key().unwrap();
    let manager =
        ConflictManager::new(env.db.clone(), env.remote.clone(), Arc::clone(&env.keys)).unwrap();

    let conflict = encrypted_conflict(&env.keys, "c-1", "mine", "theirs");
    env.remote.with(|s| s.conflicts = vec![conflict]);
    manager.fetch_from_backend().await.unwrap();

    manager
        .resolve("c-1", ResolutionChoice::Merged, Some("mine and theirs"))
        .await
        .unwrap();

    let key = env.keys.symmetric_key().unwrap();
    env.remote.with(|s| {
        let (_, req) = &s.resolutions[0];
        assert_eq!(req.chosen_version, "merged");
        let plaintext = decrypt_parts(
            &key,
            req.final_ciphertext.as_ref().unwrap(),
            req.final_iv.as_ref().unwrap(),
            req.final_tag.as_deref(),
        )
        .unwrap();
        assert_eq!(plaintext, "mine and theirs");
    });
}

#[tokio::test]
async fn test_failed_resolve_keeps_conflict_selectable() {
    let env = setup(true);
    env.keys.generate_symmetric_key().unwrap();
    let manager =
        ConflictManager::new(env.db.clone(), env.remote.clone(), Arc::clone(&env.keys)).unwrap();

    let conflict = encrypted_conflict(&env.keys, "c-1", "mine", "theirs");
    env.remote.with(|s| {
        s.conflicts = vec![conflict];
        s.fail_resolve = true;
    });
    manager.fetch_from_backend().await.unwrap();

    let result = manager.resolve("c-1", ResolutionChoice::Remote, None).await;
    assert!(result.is_err());
    assert_eq!(manager.local_conflicts().unwrap().len(), 1);
}

// ============================================================================
// Engine
// ============================================================================

#[tokio::test]
async fn test_engine_persists_tier_after_successful_transition() {
    let env = setup(true);
    seed_entries(&env.db, 1);
    env.keys.generate_symmetric_key().unwrap();
    let engine =
        SyncEngine::new(env.db.clone(), env.remote.clone(), Arc::clone(&env.keys)).unwrap();

    assert_eq!(engine.current_tier().await, PrivacyTier::LocalOnly);

    let result = engine
        .set_privacy_tier(PrivacyTier::FullSync, None)
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(engine.current_tier().await, PrivacyTier::FullSync);
    assert!(engine.config().await.consented_at.is_some());

    // a second engine over the same database sees the persisted choice
    let reloaded =
        SyncEngine::new(env.db.clone(), env.remote.clone(), Arc::clone(&env.keys)).unwrap();
    assert_eq!(reloaded.current_tier().await, PrivacyTier::FullSync);
}

#[tokio::test]
async fn test_engine_keeps_tier_on_failed_transition() {
    let env = setup(true);
    env.remote.with(|s| s.fail_tier_push = true);
    let engine =
        SyncEngine::new(env.db.clone(), env.remote.clone(), Arc::clone(&env.keys)).unwrap();

    let result = engine
        .set_privacy_tier(PrivacyTier::AnalyticsSync, None)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(engine.current_tier().await, PrivacyTier::LocalOnly);
}

#[tokio::test]
async fn test_engine_queues_encrypted_mutations_at_full_sync_only() {
    let env = setup(true);
    let ids = seed_entries(&env.db, 1);
    env.keys.generate_symmetric_key().unwrap();
    let engine =
        SyncEngine::new(env.db.clone(), env.remote.clone(), Arc::clone(&env.keys)).unwrap();

    // below full sync nothing is queued
    assert!(engine
        .queue_entry_mutation(SyncOp::Update, &ids[0])
        .await
        .unwrap()
        .is_none());

    engine
        .set_privacy_tier(PrivacyTier::FullSync, None)
        .await
        .unwrap();
    let queued = engine
        .queue_entry_mutation(SyncOp::Update, &ids[0])
        .await
        .unwrap();
    assert!(queued.is_some());

    // the queued payload is ciphertext, not the entry text
    let items = env.queue.pending_items().unwrap();
    assert_eq!(items.len(), 1);
    assert!(!items[0].payload.contains("journal entry number"));
    let payload: serde_json::Value = serde_json::from_str(&items[0].payload).unwrap();
    assert!(payload.get("ciphertext").is_some());
    assert!(payload.get("tag").is_some());
}

#[tokio::test]
async fn test_engine_drains_queue_through_remote() {
    let env = setup(true);
    let ids = seed_entries(&env.db, 1);
    env.keys.generate_symmetric_key().unwrap();
    let engine =
        SyncEngine::new(env.db.clone(), env.remote.clone(), Arc::clone(&env.keys)).unwrap();
    engine
        .set_privacy_tier(PrivacyTier::FullSync, None)
        .await
        .unwrap();
    engine
        .queue_entry_mutation(SyncOp::Update, &ids[0])
        .await
        .unwrap();

    let outcome = engine.process_queue().await.unwrap();
    assert_eq!(outcome.processed, 1);
    assert_eq!(engine.queue_status().unwrap().total, 0);
    env.remote.with(|s| assert_eq!(s.mutations.len(), 1));
}
