//! Request batches: the worker pool driving the resilient client.

use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::client::{RequestDescriptor, RequestError, ResilientClient};
use crate::scheduler::{BatchError, WorkerPool};

/// Runs many requests through one client under the pool's limits.
#[derive(Debug)]
pub struct RequestBatch {
    pool: WorkerPool,
    client: ResilientClient,
}

impl RequestBatch {
    /// Pair a pool with a client.
    ///
    /// Both should normally share one `ConfigStore`.
    pub fn new(pool: WorkerPool, client: ResilientClient) -> Self {
        Self { pool, client }
    }

    /// Execute every request; the first terminal failure aborts the batch.
    pub async fn run(
        &self,
        requests: Vec<RequestDescriptor>,
        limit: Option<usize>,
    ) -> Result<Vec<JsonValue>, BatchError<RequestError>> {
        self.run_with_cancel(requests, limit, &CancellationToken::new())
            .await
    }

    /// Execute every request, stopping early when `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        requests: Vec<RequestDescriptor>,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<JsonValue>, BatchError<RequestError>> {
        let client = &self.client;
        let operations: Vec<_> = requests
            .into_iter()
            .map(|req| move || client.execute_with_cancel(req, cancel))
            .collect();

        self.pool.run_with_cancel(operations, limit, cancel).await
    }

    /// Execute every request, keeping each failure in its own slot.
    pub async fn run_settled(
        &self,
        requests: Vec<RequestDescriptor>,
        limit: Option<usize>,
    ) -> Result<Vec<Result<JsonValue, RequestError>>, BatchError<RequestError>> {
        self.run_settled_with_cancel(requests, limit, &CancellationToken::new())
            .await
    }

    /// Settled execution that stops early when `cancel` fires.
    pub async fn run_settled_with_cancel(
        &self,
        requests: Vec<RequestDescriptor>,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<JsonValue, RequestError>>, BatchError<RequestError>> {
        let client = &self.client;
        let operations: Vec<_> = requests
            .into_iter()
            .map(|req| move || client.execute_with_cancel(req, cancel))
            .collect();

        self.pool
            .run_settled_with_cancel(operations, limit, cancel)
            .await
    }
}
