//! # Core Engine Module
//!
//! Per-instrument state and the read path used by renderers.
//!
//! - **`rolling_buffer`**: bounded, timestamp-ordered history of one
//!   instrument with duplicate rejection, front eviction and windowed
//!   snapshots.
//! - **`registry`**: arena of instruments keyed by id. The map has its own
//!   lock and every instrument has its own reader-writer lock, so writes to
//!   one instrument never block reads of another.
//! - **`snapshot`**: point-in-time copies of an instrument's records and
//!   controls, honouring pause and time-window settings.
//! - **`clock`**: injectable source of "now".

#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Injectable wall clock.
pub mod clock;
/// Arena of instruments and their control state.
pub mod registry;
/// Bounded, ordered per-instrument history.
pub mod rolling_buffer;
/// Read-only views for the presentation layer.
pub mod snapshot;

// --- Public API Re-exports ---
pub use clock::{Clock, ManualClock, SystemClock};
pub use registry::{Instrument, InstrumentRegistry};
pub use rolling_buffer::{InsertOutcome, RollingBuffer, DEFAULT_CAPACITY};
pub use snapshot::{InstrumentOverview, InstrumentSnapshot, SnapshotBuilder};
