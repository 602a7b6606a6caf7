use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::store::WalStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// One compactor pass. Returns true if the log was rewritten.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold.max(1) {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            error!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("waitroom_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = Arc::new(WalStore::open(path.clone()).unwrap());
        store.seed_rooms(&["Front"]).await.unwrap();
        let engine = Engine::new(store.clone());

        engine.join_waitlist(0, "Ann").await.unwrap();
        assert!(!compact_if_due(&store, 10).await);

        for i in 0..10 {
            engine.join_waitlist(0, &format!("guest{i}")).await.unwrap();
        }
        assert!(compact_if_due(&store, 10).await);
        assert_eq!(store.appends_since_compact().await, 0);
        assert!(!compact_if_due(&store, 10).await);

        drop(engine);
        drop(store);
        let reopened = WalStore::open(path).unwrap();
        let engine = Engine::new(Arc::new(reopened));
        assert_eq!(engine.get(0).await.unwrap().wait_list.len(), 11);
    }
}
