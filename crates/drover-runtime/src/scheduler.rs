//! Bounded worker pool.
//!
//! The pool runs an ordered batch of independent operations with at most
//! `limit` in flight and returns their values in submission order.
//!
//! # Architecture
//! - Fan-out: `limit` workers share one atomic cursor; each claim is a
//!   single `fetch_add`, so no index is ever claimed twice
//! - Workers are polled together inside the calling task
//! - Fan-in: values land in position-indexed result slots
//! - Structured failure: the first error drops every sibling worker
//!   before `run` returns, so nothing outlives the reported failure

use futures::future;
use parking_lot::Mutex;
use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use drover_core::ConfigStore;

/// Errors from a batch run.
#[derive(Error, Debug)]
pub enum BatchError<E> {
    #[error("Operation {index} failed: {source}")]
    Operation { index: usize, source: E },

    #[error("Batch cancelled")]
    Cancelled,

    #[error("Result slot {index} was never filled")]
    SlotUnfilled { index: usize },
}

impl<E> BatchError<E> {
    /// Index of the failing operation, if an operation failed.
    pub fn index(&self) -> Option<usize> {
        match self {
            BatchError::Operation { index, .. } | BatchError::SlotUnfilled { index } => {
                Some(*index)
            }
            BatchError::Cancelled => None,
        }
    }

    /// The operation's own error, if an operation failed.
    pub fn into_source(self) -> Option<E> {
        match self {
            BatchError::Operation { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Runs batches of operations under a concurrency cap.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    config: Arc<ConfigStore>,
}

impl WorkerPool {
    /// Create a pool reading its defaults from `config`.
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    /// Worker count for a batch: `requested` clamped to `1..=batch_len`.
    pub fn effective_workers(requested: usize, batch_len: usize) -> usize {
        requested.clamp(1, batch_len.max(1))
    }

    /// Run every operation and collect the values in submission order.
    ///
    /// `limit` overrides the configured concurrency. The first failure is
    /// returned as [`BatchError::Operation`] and cancels all other work.
    pub async fn run<F, Fut, T, E>(
        &self,
        operations: Vec<F>,
        limit: Option<usize>,
    ) -> Result<Vec<T>, BatchError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_cancel(operations, limit, &CancellationToken::new())
            .await
    }

    /// Like [`WorkerPool::run`], but stops early when `cancel` fires.
    pub async fn run_with_cancel<F, Fut, T, E>(
        &self,
        operations: Vec<F>,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, BatchError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let len = operations.len();
        if len == 0 {
            return Ok(Vec::new());
        }

        let config = self.config.snapshot();
        let workers = Self::effective_workers(limit.unwrap_or(config.concurrency), len);
        tracing::debug!(operations = len, workers, "Starting batch");

        let queue = ClaimQueue::new(operations);
        let slots = ResultSlots::new(len);

        let all_workers = future::try_join_all(
            (0..workers).map(|worker| work(worker, &queue, &slots, config.throttle)),
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(operations = len, "Batch cancelled");
                return Err(BatchError::Cancelled);
            }
            joined = all_workers => {
                if let Err(e) = joined {
                    tracing::warn!(index = ?e.index(), "Batch aborted by failing operation");
                    return Err(e);
                }
            }
        }

        let values = slots.into_values()?;
        tracing::debug!(operations = len, "Batch complete");
        Ok(values)
    }

    /// Run every operation, capturing each failure in its own slot.
    ///
    /// One failing operation never aborts the others.
    pub async fn run_settled<F, Fut, T, E>(
        &self,
        operations: Vec<F>,
        limit: Option<usize>,
    ) -> Result<Vec<Result<T, E>>, BatchError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_settled_with_cancel(operations, limit, &CancellationToken::new())
            .await
    }

    /// Like [`WorkerPool::run_settled`], but stops early when `cancel` fires.
    pub async fn run_settled_with_cancel<F, Fut, T, E>(
        &self,
        operations: Vec<F>,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<T, E>>, BatchError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let settled: Vec<_> = operations
            .into_iter()
            .map(|op| move || async move { Ok::<_, Infallible>(op().await) })
            .collect();

        self.run_with_cancel(settled, limit, cancel)
            .await
            .map_err(|e| match e {
                BatchError::Operation { source, .. } => match source {},
                BatchError::Cancelled => BatchError::Cancelled,
                BatchError::SlotUnfilled { index } => BatchError::SlotUnfilled { index },
            })
    }
}

/// One worker: claim, run, store, throttle, repeat.
async fn work<F, Fut, T, E>(
    worker: usize,
    queue: &ClaimQueue<F>,
    slots: &ResultSlots<T>,
    throttle: Duration,
) -> Result<(), BatchError<E>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    while let Some((index, operation)) = queue.claim() {
        tracing::trace!(worker, index, "Claimed operation");
        let value = operation()
            .await
            .map_err(|source| BatchError::Operation { index, source })?;
        slots.fill(index, value);

        if !throttle.is_zero() {
            tokio::time::sleep(throttle).await;
        }
    }
    Ok(())
}

/// Operations waiting to be claimed, behind a shared cursor.
struct ClaimQueue<F> {
    cursor: AtomicUsize,
    operations: Vec<Mutex<Option<F>>>,
}

impl<F> ClaimQueue<F> {
    fn new(operations: Vec<F>) -> Self {
        Self {
            cursor: AtomicUsize::new(0),
            operations: operations
                .into_iter()
                .map(|op| Mutex::new(Some(op)))
                .collect(),
        }
    }

    /// Claim the next unclaimed operation, or `None` when the batch is drained.
    fn claim(&self) -> Option<(usize, F)> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        let operation = self.operations.get(index)?.lock().take()?;
        Some((index, operation))
    }
}

/// Position-indexed output cells, each written once.
struct ResultSlots<T> {
    slots: Mutex<Vec<Option<T>>>,
}

impl<T> ResultSlots<T> {
    fn new(len: usize) -> Self {
        Self {
            slots: Mutex::new((0..len).map(|_| None).collect()),
        }
    }

    fn fill(&self, index: usize, value: T) {
        let previous = self.slots.lock()[index].replace(value);
        debug_assert!(previous.is_none(), "result slot {index} written twice");
    }

    fn into_values<E>(self) -> Result<Vec<T>, BatchError<E>> {
        let slots = self.slots.into_inner();
        let mut values = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            values.push(slot.ok_or(BatchError::SlotUnfilled { index })?);
        }
        Ok(values)
    }
}
