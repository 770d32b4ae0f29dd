//! Bounded fan-out executor for batched external fetches.
//!
//! [`FanOut`] runs one task per input with at most `workers` task bodies in
//! flight, and returns the per-input outcomes in input order. It never
//! retries and never cancels: tasks that need a deadline carry their own.
//!
//! [`Batch`] applies the classification every multi-target adapter uses on
//! those outcomes:
//!
//! | Outcome | Items | Error |
//! |---------|-------|-------|
//! | all succeeded (or no inputs) | all | none |
//! | some failed | the successes | [`BatchError::PartialContent`] |
//! | all failed | none | [`BatchError::NoContent`] |

use anyhow::{anyhow, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::BatchError;

/// A task applied to every input of a batch with bounded concurrency.
///
/// ```rust,no_run
/// # async fn demo() {
/// use pulse::executor::FanOut;
///
/// let lengths = FanOut::new(|repo: String| async move { Ok::<_, anyhow::Error>(repo.len()) })
///     .workers(4)
///     .run(vec!["rust-lang/rust".to_string(), "tokio-rs/tokio".to_string()])
///     .await;
/// assert_eq!(lengths.len(), 2);
/// # }
/// ```
pub struct FanOut<F> {
    task: Arc<F>,
    workers: usize,
}

impl<F> FanOut<F> {
    /// Create an executor with a single worker.
    pub fn new(task: F) -> Self {
        Self {
            task: Arc::new(task),
            workers: 1,
        }
    }

    /// Set the concurrency cap. Clamped to `[1, inputs]` at run time.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Invoke the task exactly once per input and wait for all of them.
    ///
    /// `results[i]` is the outcome for `inputs[i]`. A panicking task is
    /// reported as an error at its index.
    pub async fn run<I, T, Fut>(&self, inputs: Vec<I>) -> Vec<Result<T>>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        I: Send + 'static,
        T: Send + 'static,
    {
        let total = inputs.len();
        if total == 0 {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(self.workers.clamp(1, total)));
        let mut handles = Vec::with_capacity(total);

        for input in inputs {
            let semaphore = Arc::clone(&semaphore);
            let task = Arc::clone(&self.task);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| anyhow!("worker pool closed: {}", e))?;
                task(input).await
            }));
        }

        let mut results = Vec::with_capacity(total);
        for handle in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(anyhow!("task aborted: {}", e)),
            };
            results.push(outcome);
        }
        results
    }
}

/// Per-task outcomes of a batch, split into successes and failures.
#[derive(Debug)]
pub struct Batch<T> {
    /// Successful results, in input order.
    pub items: Vec<T>,
    /// Failed tasks as `(input index, error)`, in input order.
    pub failures: Vec<(usize, anyhow::Error)>,
    pub total: usize,
}

impl<T> Batch<T> {
    pub fn collect(results: Vec<Result<T>>) -> Self {
        let total = results.len();
        let mut items = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(item) => items.push(item),
                Err(e) => failures.push((index, e)),
            }
        }

        Self {
            items,
            failures,
            total,
        }
    }

    /// Classify the batch; `None` means full success.
    pub fn outcome(&self) -> Option<BatchError> {
        let failed = self.failures.len();
        if failed == 0 {
            None
        } else if failed == self.total {
            Some(BatchError::NoContent { total: self.total })
        } else {
            Some(BatchError::PartialContent {
                failed,
                total: self.total,
            })
        }
    }

    /// Consume the batch into its usable items and classification.
    pub fn into_parts(self) -> (Vec<T>, Option<BatchError>) {
        let outcome = self.outcome();
        (self.items, outcome)
    }
}
