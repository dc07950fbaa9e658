//! Ingest diagnostics.
//!
//! Lock-free counters updated by the poller and read by the server's
//! metrics route and stall monitor.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ParseError;

const NEVER: i64 = i64::MIN;

/// Counters describing the health of the ingest pipeline.
#[derive(Debug)]
pub struct IngestMetrics {
    pub polls: AtomicU64,
    pub store_failures: AtomicU64,
    pub keys_discovered: AtomicU64,
    pub records_accepted: AtomicU64,
    pub duplicates: AtomicU64,
    pub missing_values: AtomicU64,
    pub malformed_keys: AtomicU64,
    pub malformed_payloads: AtomicU64,
    pub invalid_timestamps: AtomicU64,
    pub late_keys: AtomicU64,
    pub evictions: AtomicU64,
    // epoch millis, NEVER until the first accepted record
    last_accepted_ms: AtomicI64,
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self {
            polls: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            keys_discovered: AtomicU64::new(0),
            records_accepted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            missing_values: AtomicU64::new(0),
            malformed_keys: AtomicU64::new(0),
            malformed_payloads: AtomicU64::new(0),
            invalid_timestamps: AtomicU64::new(0),
            late_keys: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            last_accepted_ms: AtomicI64::new(NEVER),
        }
    }
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed or failed poll cycle.
    pub fn record_poll(&self, ok: bool) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.store_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a record that landed in a buffer.
    pub fn record_accepted(&self, evicted: usize, at: DateTime<Utc>) {
        self.records_accepted.fetch_add(1, Ordering::Relaxed);
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        self.last_accepted_ms.fetch_max(at.timestamp_millis(), Ordering::Relaxed);
    }

    /// Record a per-record parse failure under its kind.
    pub fn record_parse_error(&self, err: &ParseError) {
        let counter = match err {
            ParseError::MalformedKey { .. } => &self.malformed_keys,
            ParseError::MalformedPayload { .. } => &self.malformed_payloads,
            ParseError::InvalidTimestamp { .. } => &self.invalid_timestamps,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Wall-clock instant of the most recent accepted record.
    pub fn last_accepted(&self) -> Option<DateTime<Utc>> {
        match self.last_accepted_ms.load(Ordering::Relaxed) {
            NEVER => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            polls: load(&self.polls),
            store_failures: load(&self.store_failures),
            keys_discovered: load(&self.keys_discovered),
            records_accepted: load(&self.records_accepted),
            duplicates: load(&self.duplicates),
            missing_values: load(&self.missing_values),
            malformed_keys: load(&self.malformed_keys),
            malformed_payloads: load(&self.malformed_payloads),
            invalid_timestamps: load(&self.invalid_timestamps),
            late_keys: load(&self.late_keys),
            evictions: load(&self.evictions),
            last_accepted: self.last_accepted(),
        }
    }
}

/// Point-in-time copy of [`IngestMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub polls: u64,
    pub store_failures: u64,
    pub keys_discovered: u64,
    pub records_accepted: u64,
    pub duplicates: u64,
    pub missing_values: u64,
    pub malformed_keys: u64,
    pub malformed_payloads: u64,
    pub invalid_timestamps: u64,
    pub late_keys: u64,
    pub evictions: u64,
    pub last_accepted: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// Records skipped because they could not be parsed.
    pub fn parse_failures(&self) -> u64 {
        self.malformed_keys + self.malformed_payloads + self.invalid_timestamps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_are_counted_by_kind() {
        let metrics = IngestMetrics::new();
        metrics.record_parse_error(&ParseError::MalformedKey {
            key: "k".into(),
            reason: "r".into(),
        });
        metrics.record_parse_error(&ParseError::InvalidTimestamp {
            key: "k".into(),
            value: "v".into(),
        });
        metrics.record_parse_error(&ParseError::InvalidTimestamp {
            key: "k2".into(),
            value: "v".into(),
        });

        let snap = metrics.snapshot();
        assert_eq!(snap.malformed_keys, 1);
        assert_eq!(snap.malformed_payloads, 0);
        assert_eq!(snap.invalid_timestamps, 2);
        assert_eq!(snap.parse_failures(), 3);
    }

    #[test]
    fn last_accepted_only_moves_forward() {
        let metrics = IngestMetrics::new();
        assert_eq!(metrics.last_accepted(), None);

        let later = DateTime::from_timestamp_millis(2_000).unwrap();
        let earlier = DateTime::from_timestamp_millis(1_000).unwrap();
        metrics.record_accepted(0, later);
        metrics.record_accepted(2, earlier);

        let snap = metrics.snapshot();
        assert_eq!(snap.last_accepted, Some(later));
        assert_eq!(snap.records_accepted, 2);
        assert_eq!(snap.evictions, 2);
    }

    #[test]
    fn failed_polls_are_counted_separately() {
        let metrics = IngestMetrics::new();
        metrics.record_poll(true);
        metrics.record_poll(false);
        let snap = metrics.snapshot();
        assert_eq!(snap.polls, 2);
        assert_eq!(snap.store_failures, 1);
    }
}
