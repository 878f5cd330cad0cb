use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background housekeeping for one engine: drains the client-index repair
/// queue and compacts the WAL once enough appends accumulate.
pub async fn run(engine: Arc<Engine>, compact_threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;

        let repaired = engine.repair_client_index().await;
        if repaired > 0 {
            info!("repaired client index for {repaired} contact(s)");
        }

        let appends = engine.wal_appends_since_compact().await;
        if appends >= compact_threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => {
                    // Next tick retries — the WAL only keeps growing meanwhile
                    tracing::warn!("WAL compaction failed, will retry: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::engine::Engine;
    use crate::notify::NotifyHub;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("posada_test_maintenance");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn repair_with_clean_queue_is_noop() {
        let path = test_wal_path("repair_noop.wal");
        let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
        engine.bootstrap().await.unwrap();
        assert_eq!(engine.repair_client_index().await, 0);
    }

    #[tokio::test]
    async fn compaction_resets_append_counter() {
        let path = test_wal_path("compact_counter.wal");
        let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
        engine.bootstrap().await.unwrap();

        assert!(engine.wal_appends_since_compact().await >= 8); // 4 rooms + 4 rates
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
