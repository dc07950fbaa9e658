//! # Redis Record Store
//!
//! Async Redis implementation of [`RecordStore`]. Keys are listed with
//! cursor-based `SCAN ... MATCH` (never blocking the server the way `KEYS`
//! does) and values are fetched with `MGET`.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::connections::RecordStore;
use crate::error::StoreError;

const DEFAULT_SCAN_COUNT: usize = 1_000;

/// A handler for Redis record-store interactions.
pub struct RedisStore {
    /// The internal Redis client instance.
    client: Client,
    /// Reconnecting connection, created on first use.
    manager: Mutex<Option<ConnectionManager>>,
    /// `COUNT` hint passed to every `SCAN` round trip.
    scan_count: usize,
}

impl RedisStore {
    /// Creates a new store from a connection string.
    ///
    /// No connection is made here; the first call connects, so the service
    /// can start while Redis is still down.
    ///
    /// # Arguments
    /// * `url` - The redis URL (e.g., "redis://127.0.0.1/").
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            manager: Mutex::new(None),
            scan_count: DEFAULT_SCAN_COUNT,
        })
    }

    pub fn with_scan_count(mut self, scan_count: usize) -> Self {
        self.scan_count = scan_count.max(1);
        self
    }

    /// Round-trips a `PING`.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut con = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut con).await?;
        Ok(())
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        let mut guard = self.manager.lock().await;
        if let Some(con) = guard.as_ref() {
            return Ok(con.clone());
        }
        let con = ConnectionManager::new(self.client.clone()).await?;
        info!("Connected to Redis");
        *guard = Some(con.clone());
        Ok(con)
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn list_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.connection().await?;
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut con)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once while the keyspace is rehashing.
        keys.sort_unstable();
        keys.dedup();
        debug!(pattern, count = keys.len(), "Scanned Redis keys");
        Ok(keys)
    }

    async fn get_values(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, StoreError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut con = self.connection().await?;
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key.as_str());
        }
        let values: Vec<Option<Vec<u8>>> = cmd.query_async(&mut con).await?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|raw| (key.clone(), raw)))
            .collect())
    }
}
