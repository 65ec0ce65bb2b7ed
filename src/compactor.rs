use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::{Engine, EngineError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the log once enough events have piled up
/// since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&engine, threshold).await {
            warn!("compaction failed: {e}");
        }
    }
}

/// Returns the number of events written if a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Result<Option<usize>, EngineError> {
    let appends = engine.appends_since_compact().await?;
    if appends < threshold {
        return Ok(None);
    }
    let written = engine.compact().await?;
    info!("compacted log: {appends} appends -> {written} events");
    Ok(Some(written))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demand::{DemandConfig, DemandService};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomrate_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let demand = Arc::new(DemandService::new(&DemandConfig::default()).unwrap());
        let engine = Engine::open(&path, demand).unwrap();

        engine.seed_default_rooms().await.unwrap();
        let id = Ulid::new();
        engine
            .book_room(id, "guest", "1", 0, 86_400_000)
            .await
            .unwrap();
        engine.cancel_booking(id).await.unwrap();

        // 2 rooms + confirm + cancel
        assert_eq!(compact_if_due(&engine, 5).await.unwrap(), None);
        assert_eq!(compact_if_due(&engine, 4).await.unwrap(), Some(2));
        assert_eq!(engine.appends_since_compact().await.unwrap(), 0);
        assert_eq!(compact_if_due(&engine, 4).await.unwrap(), None);
    }
}
