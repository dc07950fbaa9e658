//! # Poller
//!
//! The single recurring task driving Scan → Parse → Insert.
//!
//! ## Key Design Principles
//! 1. **Store failures are transient**: a failed list or fetch aborts the
//!    current cycle only. Keys whose values were not fetched are released
//!    back to the scanner, and the next attempt waits out an exponential
//!    backoff. Buffered data is never touched, and the scanner only prunes
//!    its seen-set once a cycle has completed.
//! 2. **Record failures are local**: a key that does not parse is logged,
//!    counted and skipped; the rest of the cycle continues.
//! 3. **Graceful stop**: cancellation is observed between cycles, so an
//!    in-flight store call finishes or times out and no record is half
//!    applied.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::configs::EngineConfig;
use crate::connections::{bounded, RecordStore};
use crate::core::{InsertOutcome, InstrumentRegistry};
use crate::error::{ConfigError, EngineError};
use crate::ingestors::key_scanner::KeyScanner;
use crate::ingestors::metrics::IngestMetrics;
use crate::parsers::PayloadParser;

/// Requests handled by the poller between cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestCommand {
    /// Forget an instrument's seen keys so records still in the store are
    /// ingested again.
    Rescan { instrument: String },
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStats {
    pub new_keys: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub missing: usize,
    pub parse_failures: usize,
    pub late: usize,
    pub evicted: usize,
}

/// Exponential retry delay, doubling from `base` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: None,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.base,
            Some(current) => current.saturating_mul(2).min(self.max),
        };
        self.current = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

pub struct Poller {
    scanner: KeyScanner,
    parser: PayloadParser,
    store: Arc<dyn RecordStore>,
    registry: Arc<InstrumentRegistry>,
    metrics: Arc<IngestMetrics>,
    config: EngineConfig,
    commands: mpsc::UnboundedReceiver<IngestCommand>,
}

impl Poller {
    /// Builds a poller and the sender used to reach it while it runs.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RecordStore>,
        registry: Arc<InstrumentRegistry>,
        metrics: Arc<IngestMetrics>,
    ) -> Result<(Self, mpsc::UnboundedSender<IngestCommand>), ConfigError> {
        config.validate()?;
        let layout = config.key_layout()?;
        let scanner = KeyScanner::new(config.key_pattern.clone(), layout.clone(), config.seen_horizon())
            .with_clock(registry.clock());
        let (tx, rx) = mpsc::unbounded_channel();

        let poller = Self {
            scanner,
            parser: PayloadParser::new(layout),
            store,
            registry,
            metrics,
            config,
            commands: rx,
        };
        Ok((poller, tx))
    }

    pub fn scanner(&self) -> &KeyScanner {
        &self.scanner
    }

    pub fn apply(&mut self, command: IngestCommand) {
        match command {
            IngestCommand::Rescan { instrument } => {
                let forgotten = self.scanner.forget_instrument(&instrument);
                info!(instrument = %instrument, forgotten, "Rescan requested");
            }
        }
    }

    /// One Scan → Parse → Insert cycle.
    pub async fn poll_once(&mut self) -> Result<PollStats, EngineError> {
        let timeout = self.config.store_timeout();
        let scan = match self.scanner.poll(self.store.as_ref(), timeout).await {
            Ok(scan) => scan,
            Err(err) => {
                self.metrics.record_poll(false);
                return Err(err.into());
            }
        };

        let mut stats = PollStats {
            new_keys: scan.new_keys.len(),
            late: scan.late,
            ..Default::default()
        };
        self.metrics.keys_discovered.fetch_add(stats.new_keys as u64, Ordering::Relaxed);
        self.metrics.late_keys.fetch_add(stats.late as u64, Ordering::Relaxed);

        let batch = self.config.fetch_batch_size.max(1);
        for (index, chunk) in scan.new_keys.chunks(batch).enumerate() {
            let values = match bounded(timeout, self.store.get_values(chunk)).await {
                Ok(values) => values,
                Err(err) => {
                    self.scanner.release(&scan.new_keys[index * batch..]);
                    self.metrics.record_poll(false);
                    return Err(err.into());
                }
            };

            for key in chunk {
                let Some(raw) = values.get(key) else {
                    // expired between listing and fetching
                    stats.missing += 1;
                    self.metrics.missing_values.fetch_add(1, Ordering::Relaxed);
                    continue;
                };

                let record = match self.parser.parse(key, raw) {
                    Ok(record) => record,
                    Err(err) => {
                        debug!(key = %key, kind = err.kind(), error = %err, "Skipping record");
                        self.metrics.record_parse_error(&err);
                        stats.parse_failures += 1;
                        continue;
                    }
                };

                match self.registry.ingest(record)? {
                    InsertOutcome::Inserted { evicted } => {
                        stats.accepted += 1;
                        stats.evicted += evicted;
                        self.metrics.record_accepted(evicted, self.registry.clock().now());
                    }
                    InsertOutcome::Duplicate => {
                        stats.duplicates += 1;
                        self.metrics.duplicates.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        let pruned = self.scanner.commit();
        if pruned > 0 {
            debug!(pruned, seen = self.scanner.seen_len(), "Pruned seen keys");
        }
        self.metrics.record_poll(true);
        Ok(stats)
    }

    /// Polls on a fixed interval until `shutdown` is cancelled.
    ///
    /// Only a capacity invariant violation ends the loop with an error.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), EngineError> {
        info!(
            pattern = %self.config.key_pattern,
            interval_ms = self.config.poll_interval_ms,
            capacity = self.registry.capacity(),
            "Poller started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut backoff = Backoff::new(self.config.backoff_base(), self.config.backoff_max());

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            while let Ok(command) = self.commands.try_recv() {
                self.apply(command);
            }

            match self.poll_once().await {
                Ok(stats) => {
                    backoff.reset();
                    if stats.new_keys > 0 {
                        debug!(
                            new = stats.new_keys,
                            accepted = stats.accepted,
                            skipped = stats.parse_failures,
                            missing = stats.missing,
                            "Poll cycle complete"
                        );
                    }
                }
                Err(EngineError::Store(err)) => {
                    let delay = backoff.next_delay();
                    warn!(error = %err, delay_ms = delay.as_millis() as u64, "Store unavailable, backing off");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    error!(error = %err, "Poller stopped on fatal error");
                    return Err(err);
                }
            }
        }

        info!("Poller stopped");
        Ok(())
    }
}
