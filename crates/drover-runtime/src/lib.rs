//! # drover-runtime
//!
//! Async execution for Drover.
//!
//! This crate drives large sets of independent operations:
//! - [`ResilientClient`] runs one JSON request to completion with a
//!   per-attempt timeout and two-tier backoff
//! - [`WorkerPool`] runs an ordered batch under a concurrency cap and
//!   returns values in submission order
//! - [`RequestBatch`] combines the two
//!
//! The transport and credential sources are traits ([`HttpClient`],
//! [`TokenProvider`]). Enable the `http` feature for the reqwest transport.
//!
//! ## Example
//!
//! ```rust,ignore
//! use drover_core::{ConfigStore, PoolConfig};
//! use drover_runtime::{
//!     RequestBatch, RequestDescriptor, ReqwestClient, ResilientClient, WorkerPool,
//! };
//!
//! let config = Arc::new(ConfigStore::new(PoolConfig::default()));
//! let client = ResilientClient::new(Arc::new(ReqwestClient::new()?), config.clone());
//! let batch = RequestBatch::new(WorkerPool::new(config), client);
//!
//! let request = RequestDescriptor::new("https://api.example.com/items", json!({"id": 1}));
//! let results = batch.run(vec![request], None).await?;
//! ```

pub mod batch;
pub mod client;
pub mod scheduler;
pub mod tokens;
pub mod transport;

pub use batch::RequestBatch;
pub use client::{RequestDescriptor, RequestError, ResilientClient};
pub use scheduler::{BatchError, WorkerPool};
pub use tokens::{
    EnvTokens, HeaderToken, NoTokens, StaticTokens, TokenError, TokenProvider,
    DEFAULT_TOKEN_HEADERS,
};
pub use transport::{HttpClient, HttpRequest, HttpResponse, TransportError};

#[cfg(feature = "http")]
pub use transport::ReqwestClient;

pub use tokio_util::sync::CancellationToken;
