//! Best-effort batch execution
//!
//! Bulk sync work (record uploads, metric uploads) must not let one bad item
//! abort the rest. [`run_best_effort`] attempts every item exactly once,
//! collects per-item errors, and reports progress before each attempt.

use std::future::Future;

/// One failed item in a batch, labeled for the end-of-run report.
#[derive(Debug, Clone)]
pub struct BatchItemError {
    pub label: String,
    pub message: String,
}

impl BatchItemError {
    pub fn new(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for BatchItemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.label, self.message)
    }
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub processed: usize,
    pub errors: Vec<BatchItemError>,
}

impl BatchOutcome {
    pub fn failed(&self) -> usize {
        self.errors.len()
    }
}

/// Runs `op` over every item, continuing past failures. `progress` is called
/// before each attempt with the 1-based position and the total.
pub async fn run_best_effort<T, F, Fut, P>(
    items: Vec<T>,
    mut op: F,
    mut progress: P,
) -> BatchOutcome
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<(), BatchItemError>>,
    P: FnMut(usize, usize),
{
    let total = items.len();
    let mut outcome = BatchOutcome::default();

    for (index, item) in items.into_iter().enumerate() {
        progress(index + 1, total);
        match op(item).await {
            Ok(()) => outcome.processed += 1,
            Err(err) => {
                log::warn!("batch item failed: {}", err);
                outcome.errors.push(err);
            }
        }
    }

    outcome
}
