//! # Test Doubles
//!
//! A scripted push connector and an in-memory snapshot provider for driving
//! the engine without a network. Compiled for this crate's tests and, behind
//! the `testing` feature, for downstream crates.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use livefeed_core::{AggregateStats, FeedEvent, SessionId, MIN_TIMER_PERIOD};

use crate::error::{SyncError, SyncResult};
use crate::provider::SnapshotProvider;
use crate::transport::{
    session_pair, PushConnector, SessionEvent, SessionEventKind, SessionHandle, SessionLink,
};

/// A throwaway event with kind `test`.
pub fn ev(id: &str) -> FeedEvent {
    FeedEvent::new(id, "test", serde_json::Value::Null, Utc::now())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Scripted Connector
// =============================================================================

/// How one scripted session behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedSession {
    /// Handshake fails immediately.
    Refuse,
    /// Opens and stays open until dropped by the test or closed by the owner.
    Accept,
}

enum RemoteCommand {
    Push(FeedEvent),
    Drop(String),
}

#[derive(Default)]
struct ConnectorState {
    script: VecDeque<ScriptedSession>,
    remotes: HashMap<SessionId, mpsc::UnboundedSender<RemoteCommand>>,
    attempts: usize,
    sent: Vec<String>,
    owner_closes: u32,
}

/// Connector whose sessions follow a script instead of a socket.
///
/// Sessions take steps from the script in order, then repeat `fallback`.
#[derive(Clone)]
pub struct ScriptedConnector {
    fallback: ScriptedSession,
    state: Arc<Mutex<ConnectorState>>,
}

impl ScriptedConnector {
    pub fn new(fallback: ScriptedSession) -> Self {
        ScriptedConnector {
            fallback,
            state: Arc::new(Mutex::new(ConnectorState::default())),
        }
    }

    /// Every session opens.
    pub fn accepting() -> Self {
        Self::new(ScriptedSession::Accept)
    }

    /// Every session is refused.
    pub fn refusing() -> Self {
        Self::new(ScriptedSession::Refuse)
    }

    /// Queues a step ahead of the fallback behavior.
    pub fn then(self, step: ScriptedSession) -> Self {
        lock(&self.state).script.push_back(step);
        self
    }

    /// Number of sessions opened so far.
    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }

    /// Frames the engine sent over open sessions.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }

    /// Sessions that ended because their owner closed them.
    pub fn owner_closes(&self) -> u32 {
        lock(&self.state).owner_closes
    }

    /// Delivers an event on `session`. False if that session is gone.
    pub fn push(&self, session: SessionId, event: FeedEvent) -> bool {
        self.remote(session, RemoteCommand::Push(event))
    }

    /// Simulates the server closing `session`. False if already gone.
    pub fn drop_session(&self, session: SessionId, reason: &str) -> bool {
        self.remote(session, RemoteCommand::Drop(reason.to_string()))
    }

    fn remote(&self, session: SessionId, command: RemoteCommand) -> bool {
        lock(&self.state)
            .remotes
            .get(&session)
            .is_some_and(|tx| tx.send(command).is_ok())
    }
}

impl PushConnector for ScriptedConnector {
    fn open(
        &self,
        session: SessionId,
        heartbeat: Duration,
        events: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        let (handle, link) = session_pair(session, events);
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();

        let step = {
            let mut state = lock(&self.state);
            state.attempts += 1;
            state.remotes.insert(session, remote_tx);
            state.script.pop_front().unwrap_or(self.fallback)
        };

        tokio::spawn(run_scripted(
            step,
            heartbeat,
            link,
            remote_rx,
            self.state.clone(),
        ));
        handle
    }
}

async fn run_scripted(
    step: ScriptedSession,
    heartbeat: Duration,
    mut link: SessionLink,
    mut remote_rx: mpsc::UnboundedReceiver<RemoteCommand>,
    state: Arc<Mutex<ConnectorState>>,
) {
    if step == ScriptedSession::Refuse {
        link.finish("connection refused").await;
        return;
    }

    link.mark_open();
    if !link.report(SessionEventKind::Opened).await {
        return;
    }

    let period = heartbeat.max(MIN_TIMER_PERIOD);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut link.shutdown_rx => {
                link.finish_silently();
                lock(&state).owner_closes += 1;
                return;
            }

            Some(text) = link.outgoing_rx.recv() => lock(&state).sent.push(text),

            Some(command) = remote_rx.recv() => match command {
                RemoteCommand::Push(event) => {
                    link.report(SessionEventKind::Message(event)).await;
                }
                RemoteCommand::Drop(reason) => {
                    link.finish(reason).await;
                    return;
                }
            },

            _ = ticker.tick() => {
                link.report(SessionEventKind::HeartbeatSent).await;
            }
        }
    }
}

// =============================================================================
// In-Memory Provider
// =============================================================================

#[derive(Default)]
struct ProviderState {
    events: Vec<FeedEvent>,
    stats: AggregateStats,
    failing: bool,
    feed_calls: u32,
}

/// Provider serving fixed data, with switchable failure.
#[derive(Default)]
pub struct InMemoryProvider {
    state: Mutex<ProviderState>,
}

impl InMemoryProvider {
    pub fn with_events(events: Vec<FeedEvent>) -> Self {
        let provider = Self::default();
        provider.set_events(events);
        provider
    }

    pub fn set_events(&self, events: Vec<FeedEvent>) {
        lock(&self.state).events = events;
    }

    pub fn set_stats(&self, stats: AggregateStats) {
        lock(&self.state).stats = stats;
    }

    /// While failing, both queries return `ProviderFailed`.
    pub fn set_failing(&self, failing: bool) {
        lock(&self.state).failing = failing;
    }

    pub fn feed_calls(&self) -> u32 {
        lock(&self.state).feed_calls
    }
}

#[async_trait]
impl SnapshotProvider for InMemoryProvider {
    async fn fetch_feed_snapshot(&self, limit: usize) -> SyncResult<Vec<FeedEvent>> {
        let mut state = lock(&self.state);
        state.feed_calls += 1;
        if state.failing {
            return Err(SyncError::ProviderFailed("scripted failure".into()));
        }
        Ok(state.events.iter().take(limit).cloned().collect())
    }

    async fn fetch_aggregate_stats(&self) -> SyncResult<AggregateStats> {
        let state = lock(&self.state);
        if state.failing {
            return Err(SyncError::ProviderFailed("scripted failure".into()));
        }
        Ok(state.stats.clone())
    }
}
