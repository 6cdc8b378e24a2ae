//! Snapshot provider backed by a JSON file.
//!
//! ```json
//! {
//!   "events": [ { "id": "e1", "kind": "workout.completed", "payload": {} } ],
//!   "stats": { "total": 120, "byKind": { "workout.completed": 80 } }
//! }
//! ```
//!
//! The file is re-read on every fetch, so editing it simulates new data.
//! Without a `stats` object the counters are derived from `events`.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;

use livefeed_core::{AggregateStats, FeedEvent};
use livefeed_sync::{SnapshotProvider, SyncError, SyncResult};

#[derive(Debug, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    events: Vec<FeedEvent>,
    #[serde(default)]
    stats: Option<AggregateStats>,
}

pub struct FileProvider {
    path: PathBuf,
}

impl FileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileProvider { path: path.into() }
    }

    async fn read(&self) -> SyncResult<SnapshotFile> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SyncError::ProviderFailed(format!("{}: {e}", self.path.display())))?;

        serde_json::from_str(&contents)
            .map_err(|e| SyncError::ProviderFailed(format!("{}: {e}", self.path.display())))
    }
}

#[async_trait]
impl SnapshotProvider for FileProvider {
    async fn fetch_feed_snapshot(&self, limit: usize) -> SyncResult<Vec<FeedEvent>> {
        let mut events = self.read().await?.events;
        events.truncate(limit);
        Ok(events)
    }

    async fn fetch_aggregate_stats(&self) -> SyncResult<AggregateStats> {
        let file = self.read().await?;
        Ok(file.stats.unwrap_or_else(|| {
            let mut stats = AggregateStats::default();
            for event in &file.events {
                stats.record(event);
            }
            stats
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("feed-watch-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_reads_events_and_limits() {
        let path = temp_file(
            r#"{ "events": [
                { "id": "a", "kind": "x" },
                { "id": "b", "kind": "y" },
                { "id": "c", "kind": "x" }
            ] }"#,
        );
        let provider = FileProvider::new(&path);

        let events = provider.fetch_feed_snapshot(2).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "a");

        let stats = provider.fetch_aggregate_stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.count_for("x"), 2);

        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_explicit_stats_win() {
        let path = temp_file(r#"{ "events": [], "stats": { "total": 99 } }"#);
        let provider = FileProvider::new(&path);

        assert_eq!(provider.fetch_aggregate_stats().await.unwrap().total, 99);
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_provider_error() {
        let provider = FileProvider::new("/nonexistent/feed-watch.json");
        assert!(matches!(
            provider.fetch_feed_snapshot(10).await,
            Err(SyncError::ProviderFailed(_))
        ));
    }
}
