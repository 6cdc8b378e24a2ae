//! # Aggregate Stats
//!
//! Derived, non-authoritative counters shown next to the feed.
//!
//! Two writers touch them:
//! - the periodic provider refresh, which replaces everything (last write wins)
//! - each newly merged push event, which bumps the counters optimistically
//!   until the next refresh corrects them

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::event::FeedEvent;

/// Running totals for the activity stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AggregateStats {
    /// Total number of events.
    #[serde(default)]
    pub total: u64,

    /// Event counts per kind.
    #[serde(default)]
    pub by_kind: BTreeMap<String, u64>,

    /// When the provider last produced these numbers.
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl AggregateStats {
    /// Optimistically counts an event observed between refreshes.
    pub fn record(&mut self, event: &FeedEvent) {
        self.total += 1;
        *self.by_kind.entry(event.kind.clone()).or_insert(0) += 1;
    }

    /// Replaces all counters with a provider refresh.
    pub fn replace_with(&mut self, fresh: AggregateStats) {
        *self = fresh;
    }

    /// Count for one kind (0 if never seen).
    pub fn count_for(&self, kind: &str) -> u64 {
        self.by_kind.get(kind).copied().unwrap_or(0)
    }
}
