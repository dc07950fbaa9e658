use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::core::DEFAULT_CAPACITY;
use crate::error::ConfigError;
use crate::parsers::KeyLayout;

/// What a live time window is measured back from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WindowAnchor {
    /// The current wall-clock instant.
    #[default]
    WallClock,
    /// The newest record in the instrument's buffer.
    LatestRecord,
}

/// # Engine Configuration
///
/// Every field has a default, so a partial JSON object (or none at all)
/// deserializes into a usable configuration. Call [`EngineConfig::validate`]
/// after merging overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Store glob listing candidate keys, `prefix:instrument:token`.
    pub key_pattern: String,
    /// Records kept per instrument.
    pub buffer_capacity: usize,
    /// Delay between poll cycles.
    pub poll_interval_ms: u64,
    /// Upper bound on a single store call.
    pub store_timeout_ms: u64,
    /// Keys fetched per `get_values` round trip.
    pub fetch_batch_size: usize,
    /// How far behind the newest key token the seen-set remembers keys.
    /// Zero keeps every key forever.
    pub seen_horizon_seconds: u64,
    /// First retry delay after a failed poll.
    pub backoff_base_ms: u64,
    /// Ceiling of the retry delay.
    pub backoff_max_ms: u64,
    pub window_anchor: WindowAnchor,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            key_pattern: "price_data:*:*".to_string(),
            buffer_capacity: DEFAULT_CAPACITY,
            poll_interval_ms: 500,
            store_timeout_ms: 2_000,
            fetch_batch_size: 500,
            seen_horizon_seconds: 3_600,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            window_anchor: WindowAnchor::WallClock,
        }
    }
}

impl EngineConfig {
    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = |field: &'static str, value: u64| {
            if value == 0 {
                Err(ConfigError::Zero { field })
            } else {
                Ok(())
            }
        };
        zero("bufferCapacity", self.buffer_capacity as u64)?;
        zero("pollIntervalMs", self.poll_interval_ms)?;
        zero("storeTimeoutMs", self.store_timeout_ms)?;
        zero("fetchBatchSize", self.fetch_batch_size as u64)?;
        zero("backoffBaseMs", self.backoff_base_ms)?;
        zero("backoffMaxMs", self.backoff_max_ms)?;
        self.key_layout().map(|_| ())
    }

    /// The key layout implied by `key_pattern`.
    pub fn key_layout(&self) -> Result<KeyLayout, ConfigError> {
        KeyLayout::from_pattern(&self.key_pattern)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms))
    }

    /// Seen-set horizon, `None` when pruning is disabled.
    pub fn seen_horizon(&self) -> Option<TimeDelta> {
        match self.seen_horizon_seconds {
            0 => None,
            secs => i64::try_from(secs).ok().and_then(TimeDelta::try_seconds),
        }
    }
}
