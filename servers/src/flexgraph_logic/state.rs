use crate::flexgraph_logic::display::DisplayTables;
use lib_flexgraph::{IngestCommand, IngestMetrics, InstrumentRegistry, SnapshotBuilder, WindowAnchor};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared handles given to every HTTP handler and background task.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<InstrumentRegistry>,
    pub snapshots: SnapshotBuilder,
    pub metrics: Arc<IngestMetrics>,
    pub display: Arc<DisplayTables>,
    // Channel to send commands to the poller
    ingest_tx: mpsc::UnboundedSender<IngestCommand>,
}

impl AppState {
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        anchor: WindowAnchor,
        metrics: Arc<IngestMetrics>,
        display: DisplayTables,
        ingest_tx: mpsc::UnboundedSender<IngestCommand>,
    ) -> Self {
        Self {
            snapshots: SnapshotBuilder::new(Arc::clone(&registry), anchor),
            registry,
            metrics,
            display: Arc::new(display),
            ingest_tx,
        }
    }

    /// Asks the poller to re-ingest an instrument's keys still in the store.
    pub fn request_rescan(&self, instrument: &str) -> Result<(), String> {
        self.ingest_tx
            .send(IngestCommand::Rescan {
                instrument: instrument.to_string(),
            })
            .map_err(|_| "Poller is not running.".to_string())
    }
}
