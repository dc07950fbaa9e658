use anyhow::{Context, Result};
use lib_flexgraph::{Poller, RecordStore, RedisStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Opens the Redis store. The service starts even if Redis is down; the
/// poller backs off until it comes up.
pub async fn connect_store(redis_url: &str) -> Result<Arc<dyn RecordStore>> {
    let store = RedisStore::new(redis_url).with_context(|| format!("Invalid Redis URL '{}'", redis_url))?;
    match store.ping().await {
        Ok(()) => info!(url = redis_url, "Redis reachable"),
        Err(e) => warn!(url = redis_url, error = %e, "Redis not reachable yet, polling will retry"),
    }
    Ok(Arc::new(store))
}

/// Runs the poller until shutdown. A fatal engine error cancels the whole
/// service.
pub async fn run(poller: Poller, shutdown: CancellationToken) {
    match poller.run(shutdown.clone()).await {
        Ok(()) => info!("Upstream poller exited."),
        Err(e) => {
            error!(error = %e, "Upstream poller failed, shutting down.");
            shutdown.cancel();
        }
    }
}
