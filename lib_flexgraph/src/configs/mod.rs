//! # Configuration Modules
//!
//! Engine settings shared by every binary built on the library. Process
//! level concerns (ports, log directories, display tables) belong to the
//! binaries themselves.

/// Tunables of the scan, parse and buffer pipeline.
pub mod engine;

pub use engine::{EngineConfig, WindowAnchor};
