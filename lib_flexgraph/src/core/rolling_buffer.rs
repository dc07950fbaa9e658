use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::EngineError;
use crate::model::Record;

/// Records kept per instrument unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// What happened to a record handed to [`RollingBuffer::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was placed in timestamp order. `evicted` records were
    /// dropped from the front to stay within capacity; when the new record
    /// is older than everything in a full buffer it is the one evicted.
    Inserted {
        /// Number of records evicted by this insertion.
        evicted: usize,
    },
    /// A record with the same key is already buffered; nothing changed.
    Duplicate,
}

/// # Rolling Buffer
///
/// The bounded history of one instrument, ascending by
/// `(timestamp, sequence)`. Appends are O(1); an out-of-order arrival is
/// placed with a binary search. After every insertion the buffer holds at
/// most `capacity` records, always the most recent ones observed.
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    records: VecDeque<Arc<Record>>,
    keys: HashSet<String>,
    capacity: usize,
}

impl RollingBuffer {
    /// An empty buffer holding at most `capacity` records (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(1_024)),
            keys: HashSet::new(),
            capacity,
        }
    }

    /// Inserts a record at its timestamp position, evicting from the front
    /// when over capacity. Re-inserting a buffered key is a no-op.
    pub fn insert(&mut self, record: Arc<Record>) -> Result<InsertOutcome, EngineError> {
        if self.keys.contains(record.raw_key()) {
            return Ok(InsertOutcome::Duplicate);
        }

        let key = record.order_key();
        self.keys.insert(record.raw_key().to_string());
        match self.records.back() {
            Some(last) if last.order_key() > key => {
                let at = self.records.partition_point(|r| r.order_key() <= key);
                self.records.insert(at, record);
            }
            _ => self.records.push_back(record),
        }

        let mut evicted = 0;
        while self.records.len() > self.capacity {
            if let Some(oldest) = self.records.pop_front() {
                self.keys.remove(oldest.raw_key());
                evicted += 1;
            }
        }

        if self.records.len() > self.capacity {
            return Err(EngineError::CapacityInvariantViolation {
                len: self.records.len(),
                capacity: self.capacity,
            });
        }
        debug_assert_eq!(self.keys.len(), self.records.len());

        Ok(InsertOutcome::Inserted { evicted })
    }

    /// Point-in-time copy of the records with `timestamp >= now - window`,
    /// or of the whole buffer when no window is set.
    pub fn snapshot(&self, window_seconds: Option<u64>, now: DateTime<Utc>) -> Vec<Arc<Record>> {
        let start = match window_cutoff(window_seconds, now) {
            Some(cutoff) => self.records.partition_point(|r| r.timestamp() < cutoff),
            None => 0,
        };
        self.records.range(start..).cloned().collect()
    }

    /// Drops every record.
    pub fn clear(&mut self) -> usize {
        let removed = self.records.len();
        self.records.clear();
        self.keys.clear();
        removed
    }

    /// Whether a record with this key is buffered.
    pub fn contains_key(&self, raw_key: &str) -> bool {
        self.keys.contains(raw_key)
    }

    /// Buffered records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Record>> + '_ {
        self.records.iter()
    }

    /// Timestamp of the newest record.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.records.back().map(|r| r.timestamp())
    }

    /// Number of buffered records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Earliest timestamp inside a trailing window ending at `anchor`.
///
/// `None` and `Some(0)` mean "no window".
pub(crate) fn window_cutoff(window_seconds: Option<u64>, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let seconds = i64::try_from(window_seconds.filter(|s| *s > 0)?).ok()?;
    anchor.checked_sub_signed(TimeDelta::try_seconds(seconds)?)
}
