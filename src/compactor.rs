use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::MemoryStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64, token: CancellationToken) {
    run_compactor_every(store, threshold, CHECK_INTERVAL, token).await
}

pub(crate) async fn run_compactor_every(
    store: Arc<MemoryStore>,
    threshold: u64,
    every: Duration,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }
        if compact_if_due(&store, threshold).await {
            info!("compacted WAL");
        }
    }
    debug!("compactor stopped");
}

/// True when a compaction ran and succeeded.
pub(crate) async fn compact_if_due(store: &MemoryStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold.max(1) {
        return false;
    }
    match store.compact().await {
        Ok(()) => true,
        Err(e) => {
            warn!(appends, "compaction failed: {e}");
            false
        }
    }
}
