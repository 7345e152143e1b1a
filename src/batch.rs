//! Rate-limited batch execution.
//!
//! Items are split into window groups of `per_window`, and each group into
//! calls of `per_call`. Once a group is done the executor sleeps out the
//! rest of the window before starting the next one. Every item that fails
//! is retried once after `retry_delay`, whatever the error; anything still
//! failing is reported back rather than aborting the batch.

use crate::store::{StoreError, limits};
use crate::util::Clock;
use crate::util::progress::ProgressTracker;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Quota shape for one kind of remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Items per call.
    pub per_call: usize,
    /// Items per window.
    pub per_window: usize,
    pub window: Duration,
    /// Pause before retrying failed items.
    pub retry_delay: Duration,
}

impl BatchPolicy {
    /// Contact creation: 10 per call, 89 per 61 s.
    pub const CREATE: Self = Self {
        per_call: limits::CREATE,
        per_window: limits::CREATE_PER_WINDOW,
        window: limits::CREATE_WINDOW,
        retry_delay: Duration::from_secs(2),
    };

    /// Photo upload: one per call, 58 per 63 s.
    pub const PHOTO: Self = Self {
        per_call: 1,
        per_window: limits::PHOTO_PER_WINDOW,
        window: limits::PHOTO_WINDOW,
        retry_delay: Duration::from_secs(2),
    };
}

/// An item that still failed after its retry.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedItem<T> {
    pub item: T,
    pub error: StoreError,
}

/// What a batch run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome<T, R> {
    pub succeeded: Vec<R>,
    pub failed: Vec<FailedItem<T>>,
    /// Remote calls made, retries included.
    pub calls: usize,
}

impl<T, R> Default for BatchOutcome<T, R> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            calls: 0,
        }
    }
}

/// Runs a per-item remote call under a [`BatchPolicy`].
pub struct RateLimitedExecutor<'a> {
    policy: BatchPolicy,
    clock: &'a dyn Clock,
    progress: Option<&'a ProgressTracker>,
}

impl<'a> RateLimitedExecutor<'a> {
    #[must_use]
    pub fn new(policy: BatchPolicy, clock: &'a dyn Clock) -> Self {
        Self {
            policy,
            clock,
            progress: None,
        }
    }

    /// Advance `tracker` as first attempts complete.
    #[must_use]
    pub fn with_progress(mut self, tracker: &'a ProgressTracker) -> Self {
        self.progress = Some(tracker);
        self
    }

    /// Push every item through `call`.
    ///
    /// `call` receives at most `per_call` items and must answer with one
    /// result per item, in order. Missing answers count as failures. Failed
    /// items get exactly one more attempt, permanent errors included.
    pub fn run<T, R, F>(&self, items: Vec<T>, mut call: F) -> BatchOutcome<T, R>
    where
        T: Clone,
        F: FnMut(&[T]) -> Vec<Result<R, StoreError>>,
    {
        let per_call = self.policy.per_call.max(1);
        let per_window = self.policy.per_window.max(per_call);
        let mut outcome = BatchOutcome::default();
        let windows: Vec<&[T]> = items.chunks(per_window).collect();
        let window_count = windows.len();

        for (window_idx, group) in windows.into_iter().enumerate() {
            let started = self.clock.now();
            for chunk in group.chunks(per_call) {
                let retry = self.attempt(chunk, &mut call, &mut outcome, true);
                if let Some(progress) = self.progress {
                    progress.inc(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
                }
                if !retry.is_empty() {
                    warn!(
                        items = retry.len(),
                        delay_ms = self.policy.retry_delay.as_millis(),
                        "Batch call had failures; retrying once"
                    );
                    self.clock.sleep(self.policy.retry_delay);
                    self.attempt(&retry, &mut call, &mut outcome, false);
                }
            }

            if window_idx + 1 < window_count {
                let elapsed = self.clock.now().saturating_duration_since(started);
                if let Some(remaining) = self.policy.window.checked_sub(elapsed) {
                    info!(
                        window = window_idx + 1,
                        of = window_count,
                        wait_secs = remaining.as_secs(),
                        "Rate window used up; waiting"
                    );
                    if let Some(progress) = self.progress {
                        progress.waiting(remaining);
                    }
                    self.clock.sleep(remaining);
                    if let Some(progress) = self.progress {
                        progress.resume();
                    }
                }
            }
        }

        debug!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            calls = outcome.calls,
            "Batch finished"
        );
        outcome
    }

    /// One call. Returns the items worth retrying when `first` is set;
    /// everything else that failed is recorded.
    fn attempt<T, R, F>(
        &self,
        chunk: &[T],
        call: &mut F,
        outcome: &mut BatchOutcome<T, R>,
        first: bool,
    ) -> Vec<T>
    where
        T: Clone,
        F: FnMut(&[T]) -> Vec<Result<R, StoreError>>,
    {
        outcome.calls += 1;
        let mut results = call(chunk).into_iter();
        let mut retry = Vec::new();
        for item in chunk {
            let result = results.next().unwrap_or_else(|| {
                Err(StoreError::Backend {
                    op: "batch".to_string(),
                    reason: "no result returned for item".to_string(),
                })
            });
            match result {
                Ok(value) => outcome.succeeded.push(value),
                Err(error) if first => {
                    debug!(error = %error, "Batch item failed; queued for retry");
                    retry.push(item.clone());
                }
                Err(error) => {
                    debug!(error = %error, "Batch item failed");
                    outcome.failed.push(FailedItem {
                        item: item.clone(),
                        error,
                    });
                }
            }
        }
        retry
    }
}
