//! # lib_flexgraph
//!
//! Ingestion-and-state engine for the flexible graph service. Keyed JSON
//! records are discovered incrementally in a key-value store, parsed into
//! per-instrument [`Record`]s and kept in a bounded, time-ordered
//! [`RollingBuffer`] per instrument. Renderers read through the
//! [`SnapshotBuilder`] and never touch a buffer directly.
//!
//! ```text
//!  RecordStore ──► KeyScanner ──► PayloadParser ──► InstrumentRegistry ──► RollingBuffer
//!                       ▲                                   │
//!                  Poller (interval, backoff)          SnapshotBuilder ──► renderer
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod configs;
pub mod connections;
pub mod core;
pub mod error;
pub mod ingestors;
#[cfg(feature = "loggers")]
pub mod loggers;
pub mod model;
pub mod parsers;

// --- Public API Re-exports ---
pub use configs::{EngineConfig, WindowAnchor};
pub use connections::{MemoryStore, RecordStore};
#[cfg(feature = "connections")]
pub use connections::RedisStore;
pub use crate::core::{
    Clock, InsertOutcome, InstrumentOverview, InstrumentRegistry, InstrumentSnapshot,
    ManualClock, RollingBuffer, SnapshotBuilder, SystemClock, DEFAULT_CAPACITY,
};
pub use error::{ConfigError, EngineError, ParseError, StoreError};
pub use ingestors::{
    Backoff, IngestCommand, IngestMetrics, KeyScanner, MetricsSnapshot, PollStats, Poller, ScanOutcome,
};
pub use model::Record;
pub use parsers::{KeyLayout, PayloadParser};
