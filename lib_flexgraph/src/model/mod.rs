//! # Data Model
//!
//! Immutable records and the timestamp normalisation shared by the parser
//! and the key scanner.

/// The parsed, immutable observation for one instrument.
pub mod record;
/// Conversion of ISO-like strings and epoch milliseconds into UTC instants.
pub mod timestamp;

pub use record::Record;
pub use timestamp::{parse_timestamp, parse_timestamp_str};
