//! # Snapshot Provider
//!
//! The pull side of the feed. How snapshots are fetched (HTTP, GraphQL, a
//! file) is up to the implementor; the engine only needs these two queries.

use async_trait::async_trait;

use livefeed_core::{AggregateStats, FeedEvent};

use crate::error::SyncResult;

/// External source of feed snapshots and aggregate counters.
#[async_trait]
pub trait SnapshotProvider: Send + Sync + 'static {
    /// The most recent events, newest first, at most `limit`.
    async fn fetch_feed_snapshot(&self, limit: usize) -> SyncResult<Vec<FeedEvent>>;

    /// Current aggregate counters.
    async fn fetch_aggregate_stats(&self) -> SyncResult<AggregateStats>;
}
