//! # Feed Engine
//!
//! Runs the [`SyncMachine`] against real sockets, timers and the provider.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FeedEngine Architecture                          │
//! │                                                                         │
//! │   FeedHandle (clone per consumer)                                       │
//! │     │ commands (start/restart/dispose/send/refreshed)                   │
//! │     │                              ▲ watch<FeedSnapshot>                │
//! │     ▼                              │                                    │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 FeedEngine (one tokio task)                      │  │
//! │  │                                                                  │  │
//! │  │  select! over:  commands │ session events │ poll results │ retry │  │
//! │  │                                                                  │  │
//! │  │  event ──► SyncMachine::apply ──► [Effect] ──► execute           │  │
//! │  │  MergeLayer + AggregateStats ──► publish snapshot                │  │
//! │  └───────────┬───────────────────────────────┬──────────────────────┘  │
//! │              │ owns                          │ owns                     │
//! │              ▼                               ▼                          │
//! │    ┌──────────────────┐             ┌──────────────────┐                │
//! │    │  SessionHandle   │             │      Poller      │                │
//! │    │  (one at a time) │             │  (generation n)  │                │
//! │    └──────────────────┘             └──────────────────┘                │
//! │                                                                         │
//! │  Session events carry their SessionId and poll results their           │
//! │  generation; anything from a replaced instance is dropped.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All state lives inside the task, so lifecycle callbacks are serialized.
//! Dropping every [`FeedHandle`] disposes the engine.

use chrono::Utc;
use serde::Serialize;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Sleep;
use tracing::{debug, info, warn, Instrument};
use ts_rs::TS;
use uuid::Uuid;

use livefeed_core::{
    AggregateStats, Backoff, BudgetReset, ConnectionState, Effect, EventSource, FeedEvent,
    FeedWindow, MachineEvent, MergeLayer, PollCadence, SyncMachine, MIN_TIMER_PERIOD,
};

use crate::error::{SyncError, SyncResult};
use crate::poller::{PollResult, Poller};
use crate::provider::SnapshotProvider;
use crate::transport::{PushConnector, SessionEvent, SessionEventKind, SessionHandle};

/// Capacity of the session and poll result channels.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Settings
// =============================================================================

/// Runtime knobs of one engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Reconnect attempts before falling back to polling.
    pub max_attempts: u32,
    /// Reconnect delays and heartbeat interval.
    pub backoff: Backoff,
    pub budget_reset: BudgetReset,
    /// Poll interval while the push channel is being attempted.
    pub poll_interval: Duration,
    /// Poll interval after the push channel gave up.
    pub fallback_interval: Duration,
    /// Window capacity; also the provider fetch limit.
    pub capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            max_attempts: livefeed_core::DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
            budget_reset: BudgetReset::default(),
            poll_interval: livefeed_core::DEFAULT_POLL_INTERVAL,
            fallback_interval: livefeed_core::DEFAULT_POLL_INTERVAL,
            capacity: livefeed_core::DEFAULT_CAPACITY,
        }
    }
}

impl EngineSettings {
    /// Raises poll intervals below [`MIN_TIMER_PERIOD`] to it.
    fn sanitized(mut self) -> Self {
        for (name, interval) in [
            ("poll_interval", &mut self.poll_interval),
            ("fallback_interval", &mut self.fallback_interval),
        ] {
            if *interval < MIN_TIMER_PERIOD {
                warn!(setting = name, ?interval, "Poll interval too short, using minimum");
                *interval = MIN_TIMER_PERIOD;
            }
        }
        self
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Everything a consumer renders, published after each change.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FeedSnapshot {
    pub feed: FeedWindow,
    pub stats: AggregateStats,
    pub state: ConnectionState,
    /// True only while a push session is open.
    pub connected: bool,
    pub disposed: bool,
}

impl FeedSnapshot {
    fn initial(capacity: usize) -> Self {
        FeedSnapshot {
            feed: FeedWindow::empty(capacity),
            stats: AggregateStats::default(),
            state: ConnectionState::Idle,
            connected: false,
            disposed: false,
        }
    }
}

// =============================================================================
// Feed Handle
// =============================================================================

#[derive(Debug)]
enum Command {
    Start,
    Restart,
    Dispose,
    Send(String),
    Refreshed {
        events: Option<Vec<FeedEvent>>,
        stats: Option<AggregateStats>,
    },
}

/// Consumer side of an engine.
///
/// Lifecycle calls are fire-and-forget and never fail; after disposal they
/// do nothing.
#[derive(Clone)]
pub struct FeedHandle {
    engine_id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<FeedSnapshot>,
    provider: Arc<dyn SnapshotProvider>,
    capacity: usize,
}

impl FeedHandle {
    pub fn engine_id(&self) -> Uuid {
        self.engine_id
    }

    /// Starts polling and the first push attempt. No-op if already started.
    pub fn start(&self) {
        self.command(Command::Start);
    }

    /// Resets the retry budget and reconnects from scratch.
    pub fn restart(&self) {
        self.command(Command::Restart);
    }

    /// Releases every timer, session and schedule. Idempotent.
    pub fn dispose(&self) {
        self.command(Command::Dispose);
    }

    /// Sends a text frame over the open session; dropped otherwise.
    pub fn send(&self, text: impl Into<String>) {
        self.command(Command::Send(text.into()));
    }

    /// Fetches a snapshot and stats from the provider right now.
    ///
    /// Whatever succeeded is merged; the first failure is returned.
    pub async fn refresh(&self) -> SyncResult<()> {
        if self.commands.is_closed() {
            return Err(SyncError::ShuttingDown);
        }

        let (events, stats) = tokio::join!(
            self.provider.fetch_feed_snapshot(self.capacity),
            self.provider.fetch_aggregate_stats(),
        );

        let mut first_error = None;
        let events = match events {
            Ok(events) => Some(events),
            Err(e) => {
                first_error = Some(e);
                None
            }
        };
        let stats = match stats {
            Ok(stats) => Some(stats),
            Err(e) => {
                first_error = first_error.or(Some(e));
                None
            }
        };

        if events.is_some() || stats.is_some() {
            self.commands
                .send(Command::Refreshed { events, stats })
                .map_err(|_| SyncError::ShuttingDown)?;
        }

        match first_error {
            Some(e) => {
                warn!(engine_id = %self.engine_id, error = %e, "Refresh failed");
                Err(e)
            }
            None => Ok(()),
        }
    }

    /// Current window.
    pub fn feed(&self) -> FeedWindow {
        self.snapshot.borrow().feed.clone()
    }

    pub fn stats(&self) -> AggregateStats {
        self.snapshot.borrow().stats.clone()
    }

    pub fn connected(&self) -> bool {
        self.snapshot.borrow().connected
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn is_disposed(&self) -> bool {
        self.snapshot.borrow().disposed
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Change notifications; the receiver always holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.snapshot.clone()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(engine_id = %self.engine_id, "Engine already stopped, ignoring command");
        }
    }
}

// =============================================================================
// Feed Engine
// =============================================================================

/// The engine task.
pub struct FeedEngine {
    machine: SyncMachine,
    merge: MergeLayer,
    stats: AggregateStats,
    connected: bool,

    connector: Arc<dyn PushConnector>,
    session: Option<SessionHandle>,
    retry: Option<Pin<Box<Sleep>>>,
    poller: Poller,
    poll_interval: Duration,
    fallback_interval: Duration,

    commands_rx: mpsc::UnboundedReceiver<Command>,
    session_tx: mpsc::Sender<SessionEvent>,
    session_rx: mpsc::Receiver<SessionEvent>,
    poll_rx: mpsc::Receiver<PollResult>,
    snapshot_tx: watch::Sender<FeedSnapshot>,
}

impl FeedEngine {
    /// Spawns an engine and returns its handle. Nothing runs until `start`.
    pub fn spawn(
        settings: EngineSettings,
        connector: Arc<dyn PushConnector>,
        provider: Arc<dyn SnapshotProvider>,
    ) -> FeedHandle {
        let engine_id = Uuid::new_v4();
        let settings = settings.sanitized();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (poll_tx, poll_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(FeedSnapshot::initial(settings.capacity));

        let engine = FeedEngine {
            machine: SyncMachine::new(
                settings.max_attempts,
                settings.backoff,
                settings.budget_reset,
            ),
            merge: MergeLayer::new(settings.capacity),
            stats: AggregateStats::default(),
            connected: false,
            connector,
            session: None,
            retry: None,
            poller: Poller::new(provider.clone(), settings.capacity, poll_tx),
            poll_interval: settings.poll_interval,
            fallback_interval: settings.fallback_interval,
            commands_rx,
            session_tx,
            session_rx,
            poll_rx,
            snapshot_tx,
        };

        let span = tracing::info_span!("feed_engine", engine_id = %engine_id);
        tokio::spawn(engine.run().instrument(span));

        FeedHandle {
            engine_id,
            commands: commands_tx,
            snapshot: snapshot_rx,
            provider,
            capacity: settings.capacity,
        }
    }

    async fn run(mut self) {
        info!(
            max_attempts = self.machine.budget().max_attempts,
            strategy = %self.machine.backoff().strategy(),
            "Feed engine ready"
        );

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All handles dropped, disposing");
                        self.dispatch(MachineEvent::Dispose);
                    }
                },

                Some(event) = self.session_rx.recv() => self.handle_session_event(event),

                Some(result) = self.poll_rx.recv() => self.handle_poll_result(result),

                _ = retry_elapsed(&mut self.retry) => {
                    self.retry = None;
                    self.dispatch(MachineEvent::RetryElapsed);
                }
            }

            if self.machine.is_disposed() {
                break;
            }
        }

        info!("Feed engine disposed");
    }

    // =========================================================================
    // Inputs
    // =========================================================================

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => self.dispatch(MachineEvent::Start),
            Command::Restart => {
                info!("Restart requested");
                self.dispatch(MachineEvent::Restart);
            }
            Command::Dispose => self.dispatch(MachineEvent::Dispose),
            Command::Send(text) => {
                let sent = self.session.as_ref().is_some_and(|s| s.send(text));
                if !sent {
                    debug!("No open session, outbound frame dropped");
                }
            }
            Command::Refreshed { events, stats } => {
                self.apply_provider_results(events, stats);
                self.publish();
            }
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        let session = event.session;
        let current = self.machine.phase().session() == Some(session);

        match event.kind {
            SessionEventKind::Opened => self.dispatch(MachineEvent::SessionOpened(session)),
            SessionEventKind::HeartbeatSent => {
                self.dispatch(MachineEvent::HeartbeatSent(session))
            }
            SessionEventKind::Closed(reason) => {
                if current {
                    warn!(session, reason = %reason, "Push session closed");
                } else {
                    debug!(session, "Ignoring close from stale session");
                }
                self.dispatch(MachineEvent::SessionClosed(session));
            }
            SessionEventKind::Message(feed_event) => {
                if current && self.machine.state() == ConnectionState::Open {
                    self.ingest_push(feed_event);
                } else {
                    debug!(session, "Dropping message from stale session");
                }
            }
        }
    }

    fn handle_poll_result(&mut self, result: PollResult) {
        if result.generation != self.poller.generation() || !self.poller.is_running() {
            debug!(generation = result.generation, "Dropping stale poll result");
            return;
        }
        self.apply_provider_results(result.events, result.stats);
        self.publish();
    }

    fn ingest_push(&mut self, event: FeedEvent) {
        debug!(id = %event.id, kind = %event.kind, "Merging pushed event");
        for fresh in self.merge.ingest(vec![event], EventSource::Push) {
            self.stats.record(&fresh);
        }
        self.publish();
    }

    fn apply_provider_results(
        &mut self,
        events: Option<Vec<FeedEvent>>,
        stats: Option<AggregateStats>,
    ) {
        if let Some(events) = events {
            debug!(count = events.len(), "Merging provider snapshot");
            self.merge.ingest(events, EventSource::Poll);
        }
        if let Some(mut stats) = stats {
            stats.refreshed_at.get_or_insert_with(Utc::now);
            self.stats.replace_with(stats);
        }
    }

    // =========================================================================
    // Machine & Effects
    // =========================================================================

    fn dispatch(&mut self, event: MachineEvent) {
        let before = self.machine.state();
        let effects = self.machine.apply(event);
        let after = self.machine.state();

        if before != after {
            info!(from = %before, to = %after, ?event, "Connection state changed");
        }

        for effect in effects {
            self.execute(effect);
        }
        self.publish();
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::StartPoller(PollCadence::Regular) => self.poller.start(self.poll_interval),
            Effect::StartPoller(PollCadence::Fallback) => {
                warn!(
                    attempts = self.machine.budget().attempts_made,
                    "Push channel exhausted, falling back to polling"
                );
                self.poller.start(self.fallback_interval);
            }
            Effect::StopPoller => self.poller.stop(),
            Effect::OpenSession(session) => {
                let heartbeat = self.machine.backoff().heartbeat_interval();
                let handle = self
                    .connector
                    .open(session, heartbeat, self.session_tx.clone());
                // Replacing drops (and closes) any previous handle.
                self.session = Some(handle);
            }
            Effect::CloseSession => {
                if let Some(mut session) = self.session.take() {
                    session.close();
                }
            }
            Effect::ScheduleRetry(delay) => {
                debug!(
                    attempt = self.machine.budget().attempts_made,
                    ?delay,
                    "Scheduling reconnect"
                );
                self.retry = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Effect::CancelRetry => self.retry = None,
            Effect::SetConnected(connected) => self.connected = connected,
        }
    }

    fn publish(&mut self) {
        let snapshot = FeedSnapshot {
            feed: self.merge.snapshot(),
            stats: self.stats.clone(),
            state: self.machine.state(),
            connected: self.connected,
            disposed: self.machine.is_disposed(),
        };

        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

/// Resolves when the pending retry timer fires; never without one.
async fn retry_elapsed(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
