//! # Feed Window & Merge Layer
//!
//! Combines push-origin and poll-origin events into one bounded view.
//!
//! ## Merge Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Merge Pipeline                                  │
//! │                                                                         │
//! │   local (push, newest first)      provider (last snapshot)              │
//! │   [A, B]                          [B, C, D]                             │
//! │      │                                │                                 │
//! │      └──────────── concat ────────────┘                                 │
//! │                      │                                                  │
//! │                      ▼                                                  │
//! │              [A, B, B, C, D]                                            │
//! │                      │  keep first occurrence per id                    │
//! │                      ▼                                                  │
//! │              [A, B, C, D]                                               │
//! │                      │  truncate to capacity (3)                        │
//! │                      ▼                                                  │
//! │              [A, B, C]                                                  │
//! │                                                                         │
//! │  Push copies come first, so a stale snapshot duplicate never            │
//! │  replaces a pushed payload.                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashSet;

use serde::Serialize;
use ts_rs::TS;

use crate::event::{EventSource, FeedEvent};

/// Default number of events kept in the window.
pub const DEFAULT_CAPACITY: usize = 50;

// =============================================================================
// Feed Window
// =============================================================================

/// Ordered, deduplicated, capacity-bounded view of recent events.
///
/// Newest first. No two entries share an `id` and `len() <= capacity()`.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct FeedWindow {
    events: Vec<FeedEvent>,
    capacity: usize,
}

impl FeedWindow {
    /// An empty window with the given capacity.
    pub fn empty(capacity: usize) -> Self {
        FeedWindow {
            events: Vec::new(),
            capacity,
        }
    }

    /// Builds the window from both inputs: local first, then provider,
    /// first occurrence per id wins, then truncate.
    pub fn merge(local: &[FeedEvent], provider: &[FeedEvent], capacity: usize) -> Self {
        let mut seen: HashSet<&str> = HashSet::with_capacity(local.len() + provider.len());
        let mut events = Vec::with_capacity(capacity.min(local.len() + provider.len()));

        for event in local.iter().chain(provider) {
            if events.len() >= capacity {
                break;
            }
            if seen.insert(event.id.as_str()) {
                events.push(event.clone());
            }
        }

        FeedWindow { events, capacity }
    }

    /// Events, newest first.
    pub fn events(&self) -> &[FeedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Looks up an event by id.
    pub fn get(&self, id: &str) -> Option<&FeedEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Event ids in window order.
    pub fn ids(&self) -> Vec<&str> {
        self.events.iter().map(|e| e.id.as_str()).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FeedEvent> {
        self.events.iter()
    }
}

impl<'a> IntoIterator for &'a FeedWindow {
    type Item = &'a FeedEvent;
    type IntoIter = std::slice::Iter<'a, FeedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

// =============================================================================
// Merge Layer
// =============================================================================

/// Holds the two merge inputs and derives the window from them.
///
/// The window is never edited in place: any ingest invalidates the cached
/// view and the next [`MergeLayer::view`] recomputes it from both inputs.
#[derive(Debug, Clone)]
pub struct MergeLayer {
    capacity: usize,
    /// Push-origin events, newest first, bounded by capacity.
    local: Vec<FeedEvent>,
    /// Most recent provider snapshot.
    provider: Vec<FeedEvent>,
    cached: Option<FeedWindow>,
}

impl MergeLayer {
    pub fn new(capacity: usize) -> Self {
        MergeLayer {
            capacity,
            local: Vec::new(),
            provider: Vec::new(),
            cached: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Ingests a batch from one source.
    ///
    /// Push batches are prepended to the local list in batch order; ids the
    /// local list already holds keep their first-observed copy. Poll batches
    /// replace the provider snapshot.
    ///
    /// Returns the events whose ids neither input held before this call.
    pub fn ingest(&mut self, events: Vec<FeedEvent>, source: EventSource) -> Vec<FeedEvent> {
        let known: HashSet<String> = self
            .local
            .iter()
            .chain(&self.provider)
            .map(|e| e.id.clone())
            .collect();

        let fresh: Vec<FeedEvent> = {
            let mut batch_ids = HashSet::new();
            events
                .iter()
                .filter(|e| !known.contains(&e.id) && batch_ids.insert(e.id.as_str()))
                .cloned()
                .collect()
        };

        match source {
            EventSource::Push => {
                let local_ids: HashSet<&str> = self.local.iter().map(|e| e.id.as_str()).collect();
                let mut batch_ids = HashSet::new();
                let mut merged: Vec<FeedEvent> = events
                    .into_iter()
                    .filter(|e| !local_ids.contains(e.id.as_str()) && batch_ids.insert(e.id.clone()))
                    .collect();

                merged.append(&mut self.local);
                merged.truncate(self.capacity);
                self.local = merged;
            }
            EventSource::Poll => {
                self.provider = events;
            }
        }

        self.cached = None;
        fresh
    }

    /// Current window, recomputed only if an input changed since last call.
    pub fn view(&mut self) -> &FeedWindow {
        let (local, provider, capacity) = (&self.local, &self.provider, self.capacity);
        self.cached
            .get_or_insert_with(|| FeedWindow::merge(local, provider, capacity))
    }

    /// Owned copy of the current window for handing to consumers.
    pub fn snapshot(&mut self) -> FeedWindow {
        self.view().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn ev(id: &str) -> FeedEvent {
        ev_with(id, json!({}))
    }

    fn ev_with(id: &str, payload: serde_json::Value) -> FeedEvent {
        FeedEvent::new(
            id,
            "test",
            payload,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_push_then_provider_scenario() {
        let mut layer = MergeLayer::new(3);
        layer.ingest(vec![ev("A"), ev("B")], EventSource::Push);
        layer.ingest(vec![ev("B"), ev("C"), ev("D")], EventSource::Poll);

        assert_eq!(layer.view().ids(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_push_copy_wins_over_provider() {
        let mut layer = MergeLayer::new(10);
        layer.ingest(vec![ev_with("X", json!({ "v": "push" }))], EventSource::Push);
        layer.ingest(vec![ev_with("X", json!({ "v": "poll" }))], EventSource::Poll);

        let window = layer.view();
        assert_eq!(window.len(), 1);
        assert_eq!(window.get("X").unwrap().payload["v"], "push");
    }

    #[test]
    fn test_push_wins_even_when_provider_arrives_first() {
        let mut layer = MergeLayer::new(10);
        layer.ingest(vec![ev_with("X", json!({ "v": "poll" })), ev("Y")], EventSource::Poll);
        layer.ingest(vec![ev_with("X", json!({ "v": "push" }))], EventSource::Push);

        let window = layer.view();
        assert_eq!(window.ids(), vec!["X", "Y"]);
        assert_eq!(window.get("X").unwrap().payload["v"], "push");
    }

    #[test]
    fn test_newer_push_goes_first() {
        let mut layer = MergeLayer::new(10);
        layer.ingest(vec![ev("A")], EventSource::Push);
        layer.ingest(vec![ev("B")], EventSource::Push);

        assert_eq!(layer.view().ids(), vec!["B", "A"]);
    }

    #[test]
    fn test_repeated_push_keeps_first_observation() {
        let mut layer = MergeLayer::new(10);
        layer.ingest(vec![ev_with("A", json!(1))], EventSource::Push);
        layer.ingest(vec![ev("B")], EventSource::Push);
        layer.ingest(vec![ev_with("A", json!(2))], EventSource::Push);

        let window = layer.view();
        assert_eq!(window.ids(), vec!["B", "A"]);
        assert_eq!(window.get("A").unwrap().payload, json!(1));
    }

    #[test]
    fn test_duplicate_ids_within_batch() {
        let mut layer = MergeLayer::new(10);
        layer.ingest(vec![ev("A"), ev("A"), ev("B")], EventSource::Push);
        layer.ingest(vec![ev("C"), ev("C")], EventSource::Poll);

        assert_eq!(layer.view().ids(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_dedup_across_many_interleavings() {
        let batches: Vec<(Vec<&str>, EventSource)> = vec![
            (vec!["1", "2", "3"], EventSource::Poll),
            (vec!["3", "4"], EventSource::Push),
            (vec!["4", "5", "1"], EventSource::Poll),
            (vec!["5", "6", "2"], EventSource::Push),
            (vec!["6", "7", "3", "1"], EventSource::Poll),
        ];

        let mut layer = MergeLayer::new(100);
        for (ids, source) in batches {
            layer.ingest(ids.into_iter().map(ev).collect(), source);
            let window = layer.view();
            let unique: HashSet<&str> = window.ids().into_iter().collect();
            assert_eq!(unique.len(), window.len());
        }
    }

    #[test]
    fn test_capacity_bound_for_all_sizes() {
        for capacity in 0..6 {
            let mut layer = MergeLayer::new(capacity);
            layer.ingest((0..4).map(|i| ev(&format!("p{i}"))).collect(), EventSource::Push);
            layer.ingest((0..4).map(|i| ev(&format!("q{i}"))).collect(), EventSource::Poll);
            layer.ingest(vec![ev("late")], EventSource::Push);

            assert!(layer.view().len() <= capacity, "capacity {capacity}");
        }
    }

    #[test]
    fn test_zero_capacity_is_always_empty() {
        let mut layer = MergeLayer::new(0);
        layer.ingest(vec![ev("A")], EventSource::Push);
        assert!(layer.view().is_empty());
    }

    #[test]
    fn test_provider_snapshot_replaces_previous() {
        let mut layer = MergeLayer::new(10);
        layer.ingest(vec![ev("A"), ev("B")], EventSource::Poll);
        layer.ingest(vec![ev("C")], EventSource::Poll);

        assert_eq!(layer.view().ids(), vec!["C"]);
    }

    #[test]
    fn test_ingest_reports_fresh_ids_only() {
        let mut layer = MergeLayer::new(10);
        let fresh = layer.ingest(vec![ev("A"), ev("B")], EventSource::Poll);
        assert_eq!(fresh.len(), 2);

        let fresh = layer.ingest(vec![ev("B"), ev("C")], EventSource::Push);
        assert_eq!(fresh.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["C"]);
    }

    #[test]
    fn test_view_is_cached_until_ingest() {
        let mut layer = MergeLayer::new(10);
        layer.ingest(vec![ev("A")], EventSource::Push);
        let first = layer.snapshot();
        assert_eq!(layer.snapshot(), first);

        layer.ingest(vec![ev("B")], EventSource::Push);
        assert_ne!(layer.snapshot(), first);
    }

    #[test]
    fn test_merge_is_pure() {
        let local = vec![ev("A")];
        let provider = vec![ev("A"), ev("B")];
        assert_eq!(
            FeedWindow::merge(&local, &provider, 5),
            FeedWindow::merge(&local, &provider, 5)
        );
    }
}
