use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::configs::WindowAnchor;
use crate::core::clock::Clock;
use crate::core::registry::InstrumentRegistry;
use crate::core::rolling_buffer::window_cutoff;
use crate::error::EngineError;
use crate::model::Record;

/// Everything a renderer needs to draw one instrument.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentSnapshot {
    /// Instrument id.
    pub instrument: String,
    /// Records in ascending `(timestamp, sequence)` order, windowed and
    /// frozen as the controls dictate.
    pub records: Vec<Arc<Record>>,
    /// Every numeric field seen so far.
    pub discovered_fields: BTreeSet<String>,
    /// Fields to plot: the user's selection, or all discovered fields.
    pub selected_fields: BTreeSet<String>,
    /// Whether `records` is the frozen pre-pause view.
    pub paused: bool,
    /// Active trailing window.
    pub window_seconds: Option<u64>,
    /// Instant the window was measured back from, when a window is active.
    pub window_anchor: Option<DateTime<Utc>>,
    /// Records in the live buffer, regardless of window or pause.
    pub total_records: usize,
}

/// Summary row for the instrument listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentOverview {
    /// Instrument id.
    pub id: String,
    /// Records in the live buffer.
    pub len: usize,
    /// Whether the view is frozen.
    pub paused: bool,
    /// Active trailing window.
    pub window_seconds: Option<u64>,
}

/// # Snapshot Builder
///
/// Read-only projection of the registry for the presentation layer. It
/// holds a per-instrument read lock only while copying, and never mutates
/// engine state.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    registry: Arc<InstrumentRegistry>,
    clock: Arc<dyn Clock>,
    anchor: WindowAnchor,
}

impl SnapshotBuilder {
    /// A builder using the registry's own clock.
    pub fn new(registry: Arc<InstrumentRegistry>, anchor: WindowAnchor) -> Self {
        let clock = registry.clock();
        Self { registry, clock, anchor }
    }

    /// Replaces the clock "now" is read from.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The registry being projected.
    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }

    /// Builds the snapshot of one instrument.
    ///
    /// A paused instrument returns its frozen copy, windowed from the pause
    /// moment; otherwise the live buffer is windowed from "now" (or from the
    /// newest record under [`WindowAnchor::LatestRecord`]).
    pub fn build(&self, id: &str) -> Result<InstrumentSnapshot, EngineError> {
        let instrument = self.registry.get(id)?;
        let state = instrument.read();
        let window = state.window_seconds;

        let (records, anchor) = match &state.paused {
            Some(frozen) => {
                let anchor = match self.anchor {
                    WindowAnchor::WallClock => frozen.frozen_at,
                    WindowAnchor::LatestRecord => frozen
                        .records
                        .last()
                        .map(|r| r.timestamp())
                        .unwrap_or(frozen.frozen_at),
                };
                let records = match window_cutoff(window, anchor) {
                    Some(cutoff) => {
                        let start = frozen.records.partition_point(|r| r.timestamp() < cutoff);
                        frozen.records[start..].to_vec()
                    }
                    None => frozen.records.clone(),
                };
                (records, anchor)
            }
            None => {
                let now = self.clock.now();
                let anchor = match self.anchor {
                    WindowAnchor::WallClock => now,
                    WindowAnchor::LatestRecord => state.buffer.latest_timestamp().unwrap_or(now),
                };
                (state.buffer.snapshot(window, anchor), anchor)
            }
        };

        Ok(InstrumentSnapshot {
            instrument: instrument.id().to_string(),
            records,
            discovered_fields: state.discovered.clone(),
            selected_fields: state.effective_selection(),
            paused: state.paused.is_some(),
            window_seconds: window,
            window_anchor: window.map(|_| anchor),
            total_records: state.buffer.len(),
        })
    }

    /// Snapshots of every instrument, ascending by id.
    pub fn build_all(&self) -> Vec<InstrumentSnapshot> {
        self.registry
            .instruments()
            .iter()
            .filter_map(|id| self.build(id).ok())
            .collect()
    }

    /// One summary row per instrument, ascending by id.
    pub fn overview(&self) -> Vec<InstrumentOverview> {
        self.registry
            .instruments()
            .into_iter()
            .filter_map(|id| {
                let instrument = self.registry.get(&id).ok()?;
                let state = instrument.read();
                Some(InstrumentOverview {
                    len: state.buffer.len(),
                    paused: state.paused.is_some(),
                    window_seconds: state.window_seconds,
                    id,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use chrono::TimeDelta;
    use serde_json::{json, Map, Value};

    const T0: i64 = 1_700_000_000_000;

    fn record(instrument: &str, ts_ms: i64, price: f64) -> Record {
        let mut fields = Map::new();
        fields.insert("price".to_string(), json!(price));
        Record::new(
            instrument,
            DateTime::from_timestamp_millis(ts_ms).unwrap(),
            ts_ms,
            fields,
            format!("price_data:{}:{}", instrument, ts_ms),
        )
    }

    fn setup(anchor: WindowAnchor) -> (Arc<ManualClock>, Arc<InstrumentRegistry>, SnapshotBuilder) {
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp_millis(T0).unwrap()));
        let registry = Arc::new(InstrumentRegistry::with_clock(10_000, clock.clone()));
        let builder = SnapshotBuilder::new(Arc::clone(&registry), anchor);
        (clock, registry, builder)
    }

    fn stamps(snapshot: &InstrumentSnapshot) -> Vec<i64> {
        snapshot.records.iter().map(|r| r.timestamp().timestamp_millis()).collect()
    }

    #[test]
    fn unknown_instrument_is_not_found() {
        let (_, _, builder) = setup(WindowAnchor::WallClock);
        assert!(matches!(builder.build("nope"), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn window_keeps_the_trailing_sixty_seconds() {
        let (clock, registry, builder) = setup(WindowAnchor::WallClock);
        // five minutes of data, one record every ten seconds, ending at T0
        for i in 0..=30 {
            registry.ingest(record("EUR_USD", T0 - 300_000 + i * 10_000, 1.0)).unwrap();
        }
        registry.set_window("EUR_USD", Some(60)).unwrap();

        let snapshot = builder.build("EUR_USD").unwrap();
        assert_eq!(snapshot.records.len(), 7);
        assert!(snapshot
            .records
            .iter()
            .all(|r| r.timestamp() >= clock.now() - TimeDelta::seconds(60)));
        assert_eq!(snapshot.total_records, 31);
        assert_eq!(snapshot.window_anchor, Some(clock.now()));
    }

    #[test]
    fn wall_clock_window_moves_with_time() {
        let (clock, registry, builder) = setup(WindowAnchor::WallClock);
        registry.ingest(record("A", T0, 1.0)).unwrap();
        registry.set_window("A", Some(60)).unwrap();
        assert_eq!(builder.build("A").unwrap().records.len(), 1);

        clock.advance(TimeDelta::seconds(61));
        assert!(builder.build("A").unwrap().records.is_empty());
    }

    #[test]
    fn latest_record_anchor_ignores_the_wall_clock() {
        let (clock, registry, builder) = setup(WindowAnchor::LatestRecord);
        for i in 0..10 {
            registry.ingest(record("A", T0 + i * 30_000, 1.0)).unwrap();
        }
        registry.set_window("A", Some(60)).unwrap();
        clock.advance(TimeDelta::days(1));

        let snapshot = builder.build("A").unwrap();
        assert_eq!(stamps(&snapshot), vec![T0 + 210_000, T0 + 240_000, T0 + 270_000]);
    }

    #[test]
    fn paused_snapshot_equals_pre_pause_snapshot() {
        let (clock, registry, builder) = setup(WindowAnchor::WallClock);
        for i in 0..5 {
            registry.ingest(record("A", T0 - 5_000 + i * 1_000, i as f64)).unwrap();
        }
        let before = builder.build("A").unwrap();

        registry.set_paused("A", true).unwrap();
        for i in 0..5 {
            clock.advance(TimeDelta::seconds(1));
            registry.ingest(record("A", T0 + i * 1_000, 10.0 + i as f64)).unwrap();
        }

        let during = builder.build("A").unwrap();
        assert!(during.paused);
        assert_eq!(during.records, before.records);
        assert_eq!(during.total_records, 10);

        registry.set_paused("A", false).unwrap();
        let after = builder.build("A").unwrap();
        assert!(!after.paused);
        assert_eq!(after.records.len(), 10);
    }

    #[test]
    fn paused_window_is_anchored_at_the_pause() {
        let (clock, registry, builder) = setup(WindowAnchor::WallClock);
        for i in 0..6 {
            registry.ingest(record("A", T0 - 50_000 + i * 10_000, 1.0)).unwrap();
        }
        registry.set_window("A", Some(20)).unwrap();
        registry.set_paused("A", true).unwrap();
        clock.advance(TimeDelta::hours(1));

        let snapshot = builder.build("A").unwrap();
        assert_eq!(stamps(&snapshot), vec![T0 - 20_000, T0 - 10_000, T0]);
        assert_eq!(snapshot.window_anchor, Some(DateTime::from_timestamp_millis(T0).unwrap()));
    }

    #[test]
    fn selection_defaults_to_discovered_fields() {
        let (_, registry, builder) = setup(WindowAnchor::WallClock);
        let fields: Map<String, Value> = match json!({"price": 1.0, "sma_short": 0.9, "signal": "HOLD"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        registry
            .ingest(Record::new("A", Utc::now(), 1, fields, "price_data:A:1"))
            .unwrap();

        let snapshot = builder.build("A").unwrap();
        let expected = BTreeSet::from(["price".to_string(), "sma_short".to_string()]);
        assert_eq!(snapshot.discovered_fields, expected);
        assert_eq!(snapshot.selected_fields, expected);

        registry
            .set_selected_fields("A", BTreeSet::from(["sma_short".to_string()]))
            .unwrap();
        let snapshot = builder.build("A").unwrap();
        assert_eq!(snapshot.selected_fields, BTreeSet::from(["sma_short".to_string()]));
    }

    #[test]
    fn overview_lists_every_instrument() {
        let (_, registry, builder) = setup(WindowAnchor::WallClock);
        registry.ingest(record("USD_JPY", T0, 150.0)).unwrap();
        registry.ingest(record("EUR_USD", T0, 1.1)).unwrap();
        registry.ingest(record("EUR_USD", T0 + 1, 1.2)).unwrap();
        registry.set_paused("USD_JPY", true).unwrap();

        let overview = builder.overview();
        assert_eq!(
            overview,
            vec![
                InstrumentOverview { id: "EUR_USD".into(), len: 2, paused: false, window_seconds: None },
                InstrumentOverview { id: "USD_JPY".into(), len: 1, paused: true, window_seconds: None },
            ]
        );
        assert_eq!(builder.build_all().len(), 2);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let (_, registry, builder) = setup(WindowAnchor::WallClock);
        registry.ingest(record("A", T0, 1.5)).unwrap();
        let value = serde_json::to_value(builder.build("A").unwrap()).unwrap();
        assert_eq!(value["instrument"], "A");
        assert_eq!(value["totalRecords"], 1);
        assert_eq!(value["records"][0]["fields"]["price"], 1.5);
        assert_eq!(value["records"][0]["rawKey"], format!("price_data:A:{}", T0));
    }
}
