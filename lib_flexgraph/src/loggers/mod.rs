//! # Logging Modules
//!
//! Process-wide `tracing` initialisation for binaries built on the library.

/// Console + rolling JSON file subscriber and log retention.
pub mod tracing_setup;

pub use tracing_setup::{cleanup_old_logs, init_tracing, LogCleanup, LogSettings, LoggerError};
