//! # Record Store Connections
//!
//! The engine reads from an external key-value store through the
//! [`RecordStore`] trait. The store has no engine state of its own: it
//! lists keys matching a glob pattern and fetches values for a batch of
//! keys. Keys that expired between listing and fetching are simply absent
//! from the returned map.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

/// Redis-backed store.
#[cfg(feature = "connections")]
pub mod cache_redis;
/// In-process store for tests, demos and replay.
pub mod memory;

#[cfg(feature = "connections")]
pub use cache_redis::RedisStore;
pub use memory::MemoryStore;

/// Minimal interface over the external key-value store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All keys matching a Redis-style glob pattern.
    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Raw values for `keys`. Missing keys are left out of the map.
    async fn get_values(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, StoreError>;
}

/// Runs a store call with an upper bound on its duration.
///
/// An elapsed timeout is reported as [`StoreError::Timeout`], which callers
/// treat like any other transient store failure.
pub async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}
