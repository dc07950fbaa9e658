//! # Parsers
//!
//! Turns a raw store key and its raw value into a [`Record`](crate::model::Record).

/// Segment layout of store keys (`prefix:instrument:token`).
pub mod key_layout;
/// JSON payload decoding and field classification.
pub mod payload;

pub use key_layout::{KeyLayout, KeyParts};
pub use payload::PayloadParser;
