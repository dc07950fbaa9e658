//! # Instrument Registry
//!
//! Arena of per-instrument state keyed by instrument id.
//!
//! ## Key Design Principles
//! 1. **Lock per instrument**: the id map is only write-locked to create an
//!    entry. Every instrument carries its own reader-writer lock, so an
//!    insert for one instrument never blocks a snapshot of another.
//! 2. **Never destroyed**: entries live for the process lifetime. `clear`
//!    empties the buffer but keeps the controls.
//! 3. **Pause freezes the view, not the feed**: records keep landing in the
//!    buffer while paused; a frozen copy taken at the pause transition is
//!    what readers see until resume.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::core::clock::{Clock, SystemClock};
use crate::core::rolling_buffer::{InsertOutcome, RollingBuffer, DEFAULT_CAPACITY};
use crate::error::EngineError;
use crate::model::Record;

/// The buffer contents captured when an instrument was paused.
#[derive(Debug, Clone)]
pub(crate) struct FrozenView {
    pub(crate) records: Vec<Arc<Record>>,
    pub(crate) frozen_at: DateTime<Utc>,
}

/// Control and data state of one instrument, guarded by [`Instrument`]'s lock.
#[derive(Debug)]
pub(crate) struct InstrumentState {
    pub(crate) buffer: RollingBuffer,
    pub(crate) discovered: BTreeSet<String>,
    pub(crate) selected: Option<BTreeSet<String>>,
    pub(crate) paused: Option<FrozenView>,
    pub(crate) window_seconds: Option<u64>,
}

impl InstrumentState {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: RollingBuffer::new(capacity),
            discovered: BTreeSet::new(),
            selected: None,
            paused: None,
            window_seconds: None,
        }
    }

    /// The user's selection restricted to discovered fields, or every
    /// discovered field when nothing was selected.
    pub(crate) fn effective_selection(&self) -> BTreeSet<String> {
        match &self.selected {
            Some(selected) => selected.intersection(&self.discovered).cloned().collect(),
            None => self.discovered.clone(),
        }
    }
}

/// One instrument's entry in the registry.
#[derive(Debug)]
pub struct Instrument {
    id: String,
    state: RwLock<InstrumentState>,
}

impl Instrument {
    fn new(id: String, capacity: usize) -> Self {
        Self {
            id,
            state: RwLock::new(InstrumentState::new(capacity)),
        }
    }

    /// The instrument identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Number of records in the live buffer.
    pub fn len(&self) -> usize {
        self.read().buffer.len()
    }

    /// Whether the live buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the instrument's view is frozen.
    pub fn is_paused(&self) -> bool {
        self.read().paused.is_some()
    }

    /// Current time-window setting.
    pub fn window_seconds(&self) -> Option<u64> {
        self.read().window_seconds
    }

    /// Every numeric field name seen so far.
    pub fn discovered_fields(&self) -> BTreeSet<String> {
        self.read().discovered.clone()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, InstrumentState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InstrumentState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// # Instrument Registry
///
/// Owns every [`Instrument`]. The registry is the only place new
/// instruments become visible to readers, and all mutation of an
/// instrument goes through it.
#[derive(Debug)]
pub struct InstrumentRegistry {
    instruments: RwLock<HashMap<String, Arc<Instrument>>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl InstrumentRegistry {
    /// A registry whose buffers hold `capacity` records, timed by the system clock.
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    /// A registry timed by `clock` (used for pause instants).
    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            instruments: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            clock,
        }
    }

    /// Capacity given to every new buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The clock this registry stamps pauses with.
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Returns the instrument, creating it on first sighting.
    pub fn upsert(&self, id: &str) -> Arc<Instrument> {
        if let Some(existing) = self.map().get(id) {
            return Arc::clone(existing);
        }

        let mut map = self.instruments.write().unwrap_or_else(PoisonError::into_inner);
        let entry = map.entry(id.to_string()).or_insert_with(|| {
            info!(instrument = id, capacity = self.capacity, "Discovered new instrument");
            Arc::new(Instrument::new(id.to_string(), self.capacity))
        });
        Arc::clone(entry)
    }

    /// Looks an instrument up without creating it.
    pub fn get(&self, id: &str) -> Result<Arc<Instrument>, EngineError> {
        self.map()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// Every known instrument id, ascending.
    pub fn instruments(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.map().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of known instruments.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// Whether no instrument has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Routes a parsed record into its instrument's buffer and grows the
    /// discovered field set when the record is accepted.
    pub fn ingest(&self, record: Record) -> Result<InsertOutcome, EngineError> {
        let instrument = self.upsert(record.instrument());
        let numeric: Vec<String> = record.numeric_fields().map(str::to_string).collect();

        let mut state = instrument.write();
        let outcome = state.buffer.insert(Arc::new(record))?;
        if let InsertOutcome::Inserted { .. } = outcome {
            for name in numeric {
                if !state.discovered.contains(&name) {
                    debug!(instrument = instrument.id(), field = %name, "Discovered numeric field");
                    state.discovered.insert(name);
                }
            }
        }
        Ok(outcome)
    }

    /// Freezes or releases the instrument's view.
    ///
    /// Pausing an already paused instrument keeps the original frozen copy.
    pub fn set_paused(&self, id: &str, paused: bool) -> Result<(), EngineError> {
        let instrument = self.get(id)?;
        let mut state = instrument.write();
        match (paused, state.paused.is_some()) {
            (true, false) => {
                let frozen_at = self.clock.now();
                let records = state.buffer.iter().cloned().collect();
                state.paused = Some(FrozenView { records, frozen_at });
                info!(instrument = id, "Paused");
            }
            (false, true) => {
                state.paused = None;
                info!(instrument = id, "Resumed");
            }
            _ => {}
        }
        Ok(())
    }

    /// Sets the trailing time window; `None` or zero shows everything.
    pub fn set_window(&self, id: &str, seconds: Option<u64>) -> Result<(), EngineError> {
        let instrument = self.get(id)?;
        instrument.write().window_seconds = seconds.filter(|s| *s > 0);
        Ok(())
    }

    /// Replaces the user's field selection.
    pub fn set_selected_fields(&self, id: &str, fields: BTreeSet<String>) -> Result<(), EngineError> {
        let instrument = self.get(id)?;
        instrument.write().selected = Some(fields);
        Ok(())
    }

    /// Empties the buffer and resets the discovered fields.
    ///
    /// Pause, window and selection are kept. A paused instrument stays
    /// paused with an empty frozen view. Returns the number of records removed.
    pub fn clear(&self, id: &str) -> Result<usize, EngineError> {
        let instrument = self.get(id)?;
        let mut state = instrument.write();
        let removed = state.buffer.clear();
        state.discovered.clear();
        if let Some(frozen) = state.paused.as_mut() {
            frozen.records.clear();
        }
        info!(instrument = id, removed, "Cleared instrument buffer");
        Ok(removed)
    }

    fn map(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Instrument>>> {
        self.instruments.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InstrumentRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
