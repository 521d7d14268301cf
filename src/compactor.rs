use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::observability;
use crate::store::WalShiftStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Rewrite the log once `threshold` appends have piled up since the last compaction.
/// Returns whether it compacted.
pub async fn compact_if_needed(store: &WalShiftStore, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact_wal().await {
        Ok(()) => {
            metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that periodically compacts the shift log.
pub async fn run_compactor(store: Arc<WalShiftStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}
