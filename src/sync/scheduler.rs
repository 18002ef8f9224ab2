//! Background Sync Scheduler
//!
//! Periodically drains the offline queue and refreshes the conflict mirror
//! at the configured interval. Uses Tokio tasks for non-blocking background
//! execution; the interval comes from the engine's sync config.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::db::Database;

use super::engine::{SyncEngine, MAX_SYNC_INTERVAL_MINUTES, MIN_SYNC_INTERVAL_MINUTES};

const STATE_KEY: &str = "scheduler_state";

/// Scheduler state stored in the settings table.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SchedulerState {
    pub enabled: bool,
    pub last_run: Option<String>, // ISO 8601 timestamp
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            enabled: false,
            last_run: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

/// Background scheduler for automatic sync passes.
#[derive(Clone)]
pub struct BackgroundScheduler {
    db: Arc<Database>,
    running: Arc<AtomicBool>,
    task_handle: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl BackgroundScheduler {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            running: Arc::new(AtomicBool::new(false)),
            task_handle: Arc::new(StdMutex::new(None)),
        }
    }

    pub fn load_state(&self) -> Result<SchedulerState, SchedulerError> {
        Ok(self
            .db
            .get_setting(STATE_KEY)
            .map_err(|e| SchedulerError::Database(e.to_string()))?
            .unwrap_or_default())
    }

    fn save_state(&self, state: &SchedulerState) -> Result<(), SchedulerError> {
        self.db
            .set_setting(STATE_KEY, state)
            .map_err(|e| SchedulerError::Database(e.to_string()))
    }

    /// Start the background task driving periodic sync passes.
    pub async fn start(&self, engine: Arc<SyncEngine>) -> Result<(), SchedulerError> {
        if self.running.load(Ordering::Relaxed) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let interval_minutes = engine.config().await.auto_sync_minutes;
        if !(MIN_SYNC_INTERVAL_MINUTES..=MAX_SYNC_INTERVAL_MINUTES).contains(&interval_minutes) {
            return Err(SchedulerError::InvalidInterval(format!(
                "Interval must be {}-{} minutes, got {}",
                MIN_SYNC_INTERVAL_MINUTES, MAX_SYNC_INTERVAL_MINUTES, interval_minutes
            )));
        }

        let mut state = self.load_state()?;
        state.enabled = true;
        self.save_state(&state)?;

        self.running.store(true, Ordering::Relaxed);

        let running = self.running.clone();
        let db = self.db.clone();
        let handle = tokio::spawn(async move {
            Self::scheduler_loop(running, db, engine, interval_minutes).await;
        });
        *self.task_handle.lock().unwrap() = Some(handle);

        log::info!(
            "Background scheduler started (interval: {} minutes)",
            interval_minutes
        );
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), SchedulerError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(SchedulerError::NotRunning);
        }

        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.task_handle.lock().unwrap().take() {
            handle.abort();
        }

        let mut state = self.load_state()?;
        state.enabled = false;
        self.save_state(&state)?;

        log::info!("Background scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    async fn scheduler_loop(
        running: Arc<AtomicBool>,
        db: Arc<Database>,
        engine: Arc<SyncEngine>,
        interval_minutes: u64,
    ) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(60 * interval_minutes));
        // The first tick fires immediately; skip it so a fresh start waits a
        // full interval before syncing.
        interval.tick().await;

        log::info!("Scheduler loop started (interval: {} minutes)", interval_minutes);

        loop {
            interval.tick().await;

            if !running.load(Ordering::Relaxed) {
                log::info!("Scheduler loop: stopping (running flag is false)");
                break;
            }

            log::info!("Background sync pass triggered by scheduler");

            match engine.process_queue().await {
                Ok(outcome) => {
                    log::info!(
                        "Queue drain completed: processed={}, failed={}",
                        outcome.processed,
                        outcome.failed
                    );
                    if !outcome.errors.is_empty() {
                        log::warn!("Queue drain had {} errors: {:?}", outcome.errors.len(), outcome.errors);
                    }
                }
                Err(e) => {
                    log::error!("Queue drain failed: {:?}", e);
                }
            }

            if engine.is_authenticated().await {
                match engine.refresh_conflicts().await {
                    Ok(conflicts) => {
                        if !conflicts.is_empty() {
                            log::info!("{} open conflict(s) awaiting resolution", conflicts.len());
                        }
                    }
                    Err(e) => {
                        log::warn!("Conflict refresh failed: {:?}", e);
                    }
                }
            }

            let state = SchedulerState {
                enabled: true,
                last_run: Some(Utc::now().to_rfc3339()),
            };
            if let Err(e) = db.set_setting(STATE_KEY, &state) {
                log::error!("Failed to save last_run timestamp: {}", e);
            }
        }

        log::info!("Scheduler loop exited");
    }
}

// ============================================================================
// Tests
// ============================================================================
