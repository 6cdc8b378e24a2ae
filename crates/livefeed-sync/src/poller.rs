//! # Fallback Poller
//!
//! Fetches provider snapshots on a fixed interval while the push channel is
//! unavailable.
//!
//! ## Schedule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Poller Schedule                                   │
//! │                                                                         │
//! │  start(30s)                                                             │
//! │    │                                                                    │
//! │    ├─ t=0    fetch ──► PollResult { generation: 3, ... }                │
//! │    ├─ t=30s  fetch ──► PollResult { generation: 3, ... }                │
//! │    ├─ t=60s  fetch fails ──► logged, schedule continues                 │
//! │    │                                                                    │
//! │  stop() ──► task ends; late results still carry generation 3 and the    │
//! │             engine drops them once the generation moved on              │
//! │                                                                         │
//! │  A fetch runs inline on its tick: a slow fetch delays the next tick,    │
//! │  fetches never overlap.                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

use livefeed_core::{AggregateStats, FeedEvent, MIN_TIMER_PERIOD};

use crate::provider::SnapshotProvider;

/// One poll cycle's outcome. At least one of the fields is set.
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    /// Schedule that produced this result.
    pub generation: u64,
    pub events: Option<Vec<FeedEvent>>,
    pub stats: Option<AggregateStats>,
}

struct RunningSchedule {
    interval: Duration,
    /// Dropping the sender ends the loop.
    _shutdown_tx: oneshot::Sender<()>,
}

/// Interval-driven snapshot fetcher owned by the engine.
pub struct Poller {
    provider: Arc<dyn SnapshotProvider>,
    limit: usize,
    results_tx: mpsc::Sender<PollResult>,
    running: Option<RunningSchedule>,
    generation: u64,
}

impl Poller {
    pub fn new(
        provider: Arc<dyn SnapshotProvider>,
        limit: usize,
        results_tx: mpsc::Sender<PollResult>,
    ) -> Self {
        Poller {
            provider,
            limit,
            results_tx,
            running: None,
            generation: 0,
        }
    }

    /// Generation of the current (or last) schedule.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Interval of the running schedule, if any.
    pub fn interval(&self) -> Option<Duration> {
        self.running.as_ref().map(|r| r.interval)
    }

    /// Starts polling: one fetch now, then one per `interval`.
    ///
    /// No-op if already running at `interval`; a different interval restarts
    /// the schedule. Intervals below [`MIN_TIMER_PERIOD`] are raised to it.
    pub fn start(&mut self, interval: Duration) {
        let interval = interval.max(MIN_TIMER_PERIOD);
        if self.interval() == Some(interval) {
            return;
        }
        self.stop();

        self.generation += 1;
        let generation = self.generation;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        info!(generation, ?interval, "Poller starting");
        let task = PollLoop {
            provider: self.provider.clone(),
            limit: self.limit,
            results_tx: self.results_tx.clone(),
            generation,
            interval,
        };
        tokio::spawn(task.run(shutdown_rx).instrument(tracing::Span::current()));

        self.running = Some(RunningSchedule {
            interval,
            _shutdown_tx: shutdown_tx,
        });
    }

    /// Stops polling. Safe when not running.
    pub fn stop(&mut self) {
        if self.running.take().is_some() {
            info!(generation = self.generation, "Poller stopped");
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollLoop {
    provider: Arc<dyn SnapshotProvider>,
    limit: usize,
    results_tx: mpsc::Sender<PollResult>,
    generation: u64,
    interval: Duration,
}

impl PollLoop {
    async fn run(self, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Some(result) = self.poll_once().await {
                        if self.results_tx.send(result).await.is_err() {
                            debug!(generation = self.generation, "Engine gone, poller exiting");
                            break;
                        }
                    }
                }

                _ = &mut shutdown_rx => break,
            }
        }
    }

    async fn poll_once(&self) -> Option<PollResult> {
        let (events, stats) = tokio::join!(
            self.provider.fetch_feed_snapshot(self.limit),
            self.provider.fetch_aggregate_stats(),
        );

        let events = events
            .map_err(|e| warn!(generation = self.generation, error = %e, "Feed snapshot fetch failed"))
            .ok();
        let stats = stats
            .map_err(|e| warn!(generation = self.generation, error = %e, "Stats fetch failed"))
            .ok();

        if events.is_none() && stats.is_none() {
            return None;
        }

        debug!(
            generation = self.generation,
            events = events.as_ref().map(Vec::len),
            "Poll cycle complete"
        );
        Some(PollResult {
            generation: self.generation,
            events,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ev, InMemoryProvider};

    fn poller(provider: Arc<InMemoryProvider>) -> (Poller, mpsc::Receiver<PollResult>) {
        let (tx, rx) = mpsc::channel(16);
        (Poller::new(provider, 50, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_immediately_then_on_interval() {
        let provider = Arc::new(InMemoryProvider::with_events(vec![ev("A")]));
        let (mut poller, mut rx) = poller(provider.clone());

        poller.start(Duration::from_secs(30));
        let first = rx.recv().await.unwrap();
        assert_eq!(first.generation, 1);
        assert_eq!(first.events.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(provider.feed_calls(), 1);

        rx.recv().await.unwrap();
        assert_eq!(provider.feed_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let provider = Arc::new(InMemoryProvider::default());
        let (mut poller, mut rx) = poller(provider.clone());

        poller.start(Duration::from_secs(30));
        poller.start(Duration::from_secs(30));
        rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(poller.generation(), 1);
        assert_eq!(provider.feed_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_interval_restarts_schedule() {
        let provider = Arc::new(InMemoryProvider::default());
        let (mut poller, mut rx) = poller(provider);

        poller.start(Duration::from_secs(30));
        rx.recv().await.unwrap();
        poller.start(Duration::from_secs(5));

        assert_eq!(poller.generation(), 2);
        assert_eq!(rx.recv().await.unwrap().generation, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_swallowed() {
        let provider = Arc::new(InMemoryProvider::default());
        provider.set_failing(true);
        let (mut poller, mut rx) = poller(provider.clone());

        poller.start(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(provider.feed_calls(), 3);
        assert!(rx.try_recv().is_err());

        provider.set_failing(false);
        let result = rx.recv().await.unwrap();
        assert!(result.events.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_still_polls() {
        let provider = Arc::new(InMemoryProvider::with_events(vec![ev("A")]));
        let (mut poller, mut rx) = poller(provider.clone());

        poller.start(Duration::ZERO);
        assert_eq!(poller.interval(), Some(MIN_TIMER_PERIOD));
        for _ in 0..3 {
            assert_eq!(rx.recv().await.unwrap().generation, 1);
        }
        assert!(provider.feed_calls() >= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_schedule() {
        let provider = Arc::new(InMemoryProvider::default());
        let (mut poller, mut rx) = poller(provider.clone());

        poller.stop();
        poller.start(Duration::from_secs(10));
        rx.recv().await.unwrap();
        poller.stop();
        poller.stop();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(provider.feed_calls(), 1);
        assert!(!poller.is_running());
    }
}
