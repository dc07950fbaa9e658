//! # Flexgraph Replay
//!
//! Seeds an in-memory store with a few minutes of synthetic ticks for two
//! instruments, runs the engine poller over it and prints what a renderer
//! would receive.

use anyhow::Result;
use chrono::Utc;
use lib_flexgraph::{
    EngineConfig, IngestMetrics, InstrumentRegistry, MemoryStore, Poller, SnapshotBuilder, WindowAnchor,
};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let start = Utc::now().timestamp_millis() - 180_000;

    // // Statement: Three minutes of one-second ticks per instrument
    for i in 0..180i64 {
        let ts = start + i * 1_000;
        store.insert_json(
            format!("price_data:EUR_USD:{}", ts),
            &json!({"timestamp": ts, "price": 1.10 + (i as f64) * 0.0001, "signal": "HOLD"}),
        );
        store.insert_json(
            format!("price_data:USD_JPY:{}", ts),
            &json!({"timestamp": ts, "price": 150.0 - (i as f64) * 0.01, "volume": i}),
        );
    }

    let config = EngineConfig {
        window_anchor: WindowAnchor::LatestRecord,
        ..Default::default()
    };
    let registry = Arc::new(InstrumentRegistry::new(config.buffer_capacity));
    let metrics = Arc::new(IngestMetrics::new());
    let (mut poller, _commands) = Poller::new(config.clone(), store, Arc::clone(&registry), Arc::clone(&metrics))?;

    println!("[*] Polling in-memory store...");
    let stats = poller.poll_once().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);

    registry.set_window("EUR_USD", Some(30))?;
    let builder = SnapshotBuilder::new(Arc::clone(&registry), config.window_anchor);

    println!("{}", serde_json::to_string_pretty(&builder.overview())?);
    let snapshot = builder.build("EUR_USD")?;
    println!(
        "[+] EUR_USD: {} of {} records inside a {:?}s window, fields {:?}",
        snapshot.records.len(),
        snapshot.total_records,
        snapshot.window_seconds,
        snapshot.selected_fields
    );
    println!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
    Ok(())
}
