//! # Ingestors
//!
//! Everything that moves data from the record store into the registry.

/// Incremental discovery of unseen keys.
pub mod key_scanner;
/// Counters describing ingest health.
pub mod metrics;
/// The recurring Scan → Parse → Insert task.
pub mod poller;

pub use key_scanner::{KeyScanner, ScanOutcome};
pub use metrics::{IngestMetrics, MetricsSnapshot};
pub use poller::{Backoff, IngestCommand, PollStats, Poller};
