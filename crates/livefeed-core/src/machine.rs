//! # Sync State Machine
//!
//! Pure transition logic of the synchronization engine. No timers, no
//! sockets: every transition returns the side effects the executor must run.
//!
//! ## States
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Connection States                           │
//! │                                                                         │
//! │  ┌──────┐  start   ┌────────────┐  opened   ┌──────┐                    │
//! │  │ Idle │ ───────► │ Connecting │ ────────► │ Open │                    │
//! │  └──────┘          └─────┬──────┘           └──┬───┘                    │
//! │                          │ closed              │ closed                 │
//! │                          ▼                     ▼                        │
//! │                    ┌───────────────────────────────┐                    │
//! │                    │ Closed (waiting on backoff)   │                    │
//! │                    └──────┬─────────────────┬──────┘                    │
//! │          retry elapsed    │                 │ budget exhausted          │
//! │          (budget left)    ▼                 ▼                           │
//! │                     Connecting        ┌────────────┐                    │
//! │                                       │ FallenBack │ ── restart ──►     │
//! │                                       └────────────┘    Connecting      │
//! │                                                                         │
//! │  dispose: any state ──► Idle (terminal, every resource released)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Session lifecycle events carry the [`SessionId`] they belong to. Events
//! for any session other than the current one are ignored, so a late
//! callback from a replaced session cannot resurrect state.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::backoff::Backoff;

/// Default number of reconnect attempts before falling back to polling.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Identifies one push session. Monotonic per machine.
pub type SessionId = u64;

// =============================================================================
// Public Connection State
// =============================================================================

/// Coarse connection state exposed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
    FallenBack,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::FallenBack => write!(f, "fallen_back"),
        }
    }
}

// =============================================================================
// Internal Phase
// =============================================================================

/// Machine state with its associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// A session is being opened.
    Connecting { session: SessionId },
    /// `session` is live; `heartbeats` counts pings sent on it.
    Open { session: SessionId, heartbeats: u32 },
    /// Waiting out the backoff before reconnect attempt `attempt`.
    Closed { attempt: u32 },
    /// Retry budget exhausted; polling only until restart.
    FallenBack,
}

impl Phase {
    pub fn connection_state(&self) -> ConnectionState {
        match self {
            Phase::Idle => ConnectionState::Idle,
            Phase::Connecting { .. } => ConnectionState::Connecting,
            Phase::Open { .. } => ConnectionState::Open,
            Phase::Closed { .. } => ConnectionState::Closed,
            Phase::FallenBack => ConnectionState::FallenBack,
        }
    }

    /// The session this phase is tracking, if any.
    pub fn session(&self) -> Option<SessionId> {
        match self {
            Phase::Connecting { session } | Phase::Open { session, .. } => Some(*session),
            _ => None,
        }
    }
}

// =============================================================================
// Retry Budget
// =============================================================================

/// Consecutive reconnect attempts used versus allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    pub attempts_made: u32,
    pub max_attempts: u32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32) -> Self {
        RetryBudget {
            attempts_made: 0,
            max_attempts,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }

    pub fn reset(&mut self) {
        self.attempts_made = 0;
    }
}

/// When a healthy session clears the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetReset {
    /// Clear as soon as a session opens.
    #[default]
    OnOpen,
    /// Clear only after this many heartbeats on the same open session.
    /// A connection that flaps faster than that still reaches `FallenBack`.
    AfterHeartbeats(u32),
}

// =============================================================================
// Events & Effects
// =============================================================================

/// Inputs to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineEvent {
    Start,
    Restart,
    SessionOpened(SessionId),
    SessionClosed(SessionId),
    HeartbeatSent(SessionId),
    RetryElapsed,
    Dispose,
}

/// Which poll interval to run the poller at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollCadence {
    /// Cold-start safety net.
    Regular,
    /// After the push channel gave up.
    Fallback,
}

/// Side effects for the executor, in the order they must run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartPoller(PollCadence),
    StopPoller,
    OpenSession(SessionId),
    /// Close the current session handle, if there is one.
    CloseSession,
    ScheduleRetry(Duration),
    CancelRetry,
    SetConnected(bool),
}

// =============================================================================
// Machine
// =============================================================================

/// The engine's state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMachine {
    phase: Phase,
    budget: RetryBudget,
    backoff: Backoff,
    budget_reset: BudgetReset,
    started: bool,
    disposed: bool,
    next_session: SessionId,
    reconnect_attempts: u64,
}

impl SyncMachine {
    pub fn new(max_attempts: u32, backoff: Backoff, budget_reset: BudgetReset) -> Self {
        SyncMachine {
            phase: Phase::Idle,
            budget: RetryBudget::new(max_attempts),
            backoff,
            budget_reset,
            started: false,
            disposed: false,
            next_session: 1,
            reconnect_attempts: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> ConnectionState {
        self.phase.connection_state()
    }

    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Total reconnect attempts issued over the machine's lifetime.
    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    /// Pure transition: returns the next machine and the effects to run.
    pub fn transition(&self, event: MachineEvent) -> (SyncMachine, Vec<Effect>) {
        let mut next = self.clone();
        let effects = next.step(event);
        (next, effects)
    }

    /// Applies `event` in place and returns the effects to run.
    pub fn apply(&mut self, event: MachineEvent) -> Vec<Effect> {
        let (next, effects) = self.transition(event);
        *self = next;
        effects
    }

    fn step(&mut self, event: MachineEvent) -> Vec<Effect> {
        if self.disposed {
            return Vec::new();
        }

        match event {
            MachineEvent::Start => self.on_start(),
            MachineEvent::Restart => self.on_restart(),
            MachineEvent::SessionOpened(id) => self.on_opened(id),
            MachineEvent::SessionClosed(id) => self.on_closed(id),
            MachineEvent::HeartbeatSent(id) => self.on_heartbeat(id),
            MachineEvent::RetryElapsed => self.on_retry_elapsed(),
            MachineEvent::Dispose => self.on_dispose(),
        }
    }

    fn allocate_session(&mut self) -> SessionId {
        let id = self.next_session;
        self.next_session += 1;
        id
    }

    fn on_start(&mut self) -> Vec<Effect> {
        if self.started {
            return Vec::new();
        }
        self.started = true;

        let session = self.allocate_session();
        self.phase = Phase::Connecting { session };
        vec![
            Effect::StartPoller(PollCadence::Regular),
            Effect::OpenSession(session),
        ]
    }

    fn on_restart(&mut self) -> Vec<Effect> {
        if !self.started {
            return self.on_start();
        }

        let mut effects = vec![Effect::CancelRetry, Effect::StopPoller];
        if self.phase.session().is_some() {
            effects.push(Effect::CloseSession);
        }
        if matches!(self.phase, Phase::Open { .. }) {
            effects.push(Effect::SetConnected(false));
        }

        self.budget.reset();
        let session = self.allocate_session();
        self.phase = Phase::Connecting { session };
        effects.push(Effect::OpenSession(session));
        effects
    }

    fn on_opened(&mut self, id: SessionId) -> Vec<Effect> {
        match self.phase {
            Phase::Connecting { session } if session == id => {
                self.phase = Phase::Open {
                    session,
                    heartbeats: 0,
                };
                if self.budget_reset == BudgetReset::OnOpen {
                    self.budget.reset();
                }
                vec![Effect::StopPoller, Effect::SetConnected(true)]
            }
            _ => Vec::new(),
        }
    }

    fn on_heartbeat(&mut self, id: SessionId) -> Vec<Effect> {
        if let Phase::Open { session, heartbeats } = &mut self.phase {
            if *session == id {
                *heartbeats += 1;
                if let BudgetReset::AfterHeartbeats(required) = self.budget_reset {
                    if *heartbeats >= required {
                        self.budget.reset();
                    }
                }
            }
        }
        Vec::new()
    }

    fn on_closed(&mut self, id: SessionId) -> Vec<Effect> {
        if self.phase.session() != Some(id) {
            return Vec::new();
        }

        let mut effects = vec![Effect::CloseSession];
        if matches!(self.phase, Phase::Open { .. }) {
            effects.push(Effect::SetConnected(false));
        }

        if self.budget.is_exhausted() {
            self.phase = Phase::FallenBack;
            effects.push(Effect::StartPoller(PollCadence::Fallback));
        } else {
            self.budget.attempts_made += 1;
            let attempt = self.budget.attempts_made;
            self.phase = Phase::Closed { attempt };
            effects.push(Effect::ScheduleRetry(self.backoff.next_delay(attempt)));
        }
        effects
    }

    fn on_retry_elapsed(&mut self) -> Vec<Effect> {
        if !matches!(self.phase, Phase::Closed { .. }) {
            return Vec::new();
        }
        self.reconnect_attempts += 1;
        let session = self.allocate_session();
        self.phase = Phase::Connecting { session };
        vec![Effect::OpenSession(session)]
    }

    fn on_dispose(&mut self) -> Vec<Effect> {
        self.disposed = true;
        self.phase = Phase::Idle;
        vec![
            Effect::CancelRetry,
            Effect::CloseSession,
            Effect::StopPoller,
            Effect::SetConnected(false),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(max: u32) -> SyncMachine {
        SyncMachine::new(max, Backoff::default(), BudgetReset::OnOpen)
    }

    fn current_session(m: &SyncMachine) -> SessionId {
        m.phase().session().expect("machine should be tracking a session")
    }

    /// Fails the current session and lets the backoff elapse.
    fn fail_and_retry(m: &mut SyncMachine) -> Vec<Effect> {
        let id = current_session(m);
        let mut effects = m.apply(MachineEvent::SessionClosed(id));
        effects.extend(m.apply(MachineEvent::RetryElapsed));
        effects
    }

    #[test]
    fn test_start_runs_poller_and_connects() {
        let mut m = machine(5);
        let effects = m.apply(MachineEvent::Start);

        assert_eq!(
            effects,
            vec![
                Effect::StartPoller(PollCadence::Regular),
                Effect::OpenSession(1)
            ]
        );
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut m = machine(5);
        m.apply(MachineEvent::Start);
        assert!(m.apply(MachineEvent::Start).is_empty());
    }

    #[test]
    fn test_open_stops_poller_and_connects() {
        let mut m = machine(5);
        m.apply(MachineEvent::Start);
        let effects = m.apply(MachineEvent::SessionOpened(1));

        assert_eq!(effects, vec![Effect::StopPoller, Effect::SetConnected(true)]);
        assert_eq!(m.state(), ConnectionState::Open);
    }

    #[test]
    fn test_close_schedules_constant_retry() {
        let mut m = machine(5);
        m.apply(MachineEvent::Start);
        m.apply(MachineEvent::SessionOpened(1));
        let effects = m.apply(MachineEvent::SessionClosed(1));

        assert_eq!(
            effects,
            vec![
                Effect::CloseSession,
                Effect::SetConnected(false),
                Effect::ScheduleRetry(Duration::from_millis(3_000)),
            ]
        );
        assert_eq!(m.state(), ConnectionState::Closed);
        assert_eq!(m.budget().attempts_made, 1);
    }

    #[test]
    fn test_open_then_six_closures_falls_back_after_five_reconnects() {
        let mut m = machine(5);
        m.apply(MachineEvent::Start);
        m.apply(MachineEvent::SessionOpened(1));

        for _ in 0..5 {
            let effects = fail_and_retry(&mut m);
            assert!(effects.iter().any(|e| matches!(e, Effect::OpenSession(_))));
        }
        assert_eq!(m.reconnect_attempts(), 5);

        let id = current_session(&m);
        let effects = m.apply(MachineEvent::SessionClosed(id));
        assert_eq!(
            effects,
            vec![
                Effect::CloseSession,
                Effect::StartPoller(PollCadence::Fallback)
            ]
        );
        assert_eq!(m.state(), ConnectionState::FallenBack);

        // No further connect attempt without restart.
        assert!(m.apply(MachineEvent::RetryElapsed).is_empty());
        assert!(m.apply(MachineEvent::SessionClosed(id)).is_empty());
        assert_eq!(m.reconnect_attempts(), 5);
    }

    #[test]
    fn test_zero_attempts_falls_back_immediately() {
        let mut m = machine(0);
        m.apply(MachineEvent::Start);
        let effects = m.apply(MachineEvent::SessionClosed(1));
        assert!(effects.contains(&Effect::StartPoller(PollCadence::Fallback)));
        assert_eq!(m.state(), ConnectionState::FallenBack);
    }

    #[test]
    fn test_on_open_policy_clears_budget_immediately() {
        let mut m = machine(2);
        m.apply(MachineEvent::Start);
        fail_and_retry(&mut m);
        assert_eq!(m.budget().attempts_made, 1);

        let id = current_session(&m);
        m.apply(MachineEvent::SessionOpened(id));
        assert_eq!(m.budget().attempts_made, 0);
    }

    #[test]
    fn test_on_open_policy_lets_flapping_connection_retry_forever() {
        let mut m = machine(2);
        m.apply(MachineEvent::Start);
        for _ in 0..20 {
            let id = current_session(&m);
            m.apply(MachineEvent::SessionOpened(id));
            fail_and_retry(&mut m);
        }
        assert_ne!(m.state(), ConnectionState::FallenBack);
    }

    #[test]
    fn test_heartbeat_policy_stops_flapping_connection() {
        let mut m = SyncMachine::new(2, Backoff::default(), BudgetReset::AfterHeartbeats(2));
        m.apply(MachineEvent::Start);

        for _ in 0..2 {
            let id = current_session(&m);
            m.apply(MachineEvent::SessionOpened(id));
            fail_and_retry(&mut m);
        }
        let id = current_session(&m);
        m.apply(MachineEvent::SessionOpened(id));
        m.apply(MachineEvent::SessionClosed(id));
        assert_eq!(m.state(), ConnectionState::FallenBack);
    }

    #[test]
    fn test_heartbeat_policy_clears_after_sustained_open() {
        let mut m = SyncMachine::new(3, Backoff::default(), BudgetReset::AfterHeartbeats(2));
        m.apply(MachineEvent::Start);
        fail_and_retry(&mut m);
        let id = current_session(&m);
        m.apply(MachineEvent::SessionOpened(id));
        assert_eq!(m.budget().attempts_made, 1);

        m.apply(MachineEvent::HeartbeatSent(id));
        assert_eq!(m.budget().attempts_made, 1);
        m.apply(MachineEvent::HeartbeatSent(id));
        assert_eq!(m.budget().attempts_made, 0);
    }

    #[test]
    fn test_stale_session_events_are_ignored() {
        let mut m = machine(5);
        m.apply(MachineEvent::Start);
        m.apply(MachineEvent::Restart);
        assert_eq!(current_session(&m), 2);

        assert!(m.apply(MachineEvent::SessionOpened(1)).is_empty());
        assert!(m.apply(MachineEvent::SessionClosed(1)).is_empty());
        assert_eq!(m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_restart_from_fallen_back() {
        let mut m = machine(0);
        m.apply(MachineEvent::Start);
        m.apply(MachineEvent::SessionClosed(1));
        assert_eq!(m.state(), ConnectionState::FallenBack);

        let effects = m.apply(MachineEvent::Restart);
        assert_eq!(
            effects,
            vec![Effect::CancelRetry, Effect::StopPoller, Effect::OpenSession(2)]
        );
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(m.budget().attempts_made, 0);
    }

    #[test]
    fn test_restart_while_open_closes_session() {
        let mut m = machine(5);
        m.apply(MachineEvent::Start);
        m.apply(MachineEvent::SessionOpened(1));
        let effects = m.apply(MachineEvent::Restart);

        assert_eq!(
            effects,
            vec![
                Effect::CancelRetry,
                Effect::StopPoller,
                Effect::CloseSession,
                Effect::SetConnected(false),
                Effect::OpenSession(2),
            ]
        );
    }

    #[test]
    fn test_restart_before_start_behaves_like_start() {
        let mut m = machine(5);
        let effects = m.apply(MachineEvent::Restart);
        assert!(effects.contains(&Effect::StartPoller(PollCadence::Regular)));
        assert!(m.is_started());
    }

    #[test]
    fn test_dispose_from_idle_and_twice() {
        let mut m = machine(5);
        let effects = m.apply(MachineEvent::Dispose);
        assert!(effects.contains(&Effect::StopPoller));
        assert!(m.is_disposed());

        assert!(m.apply(MachineEvent::Dispose).is_empty());
        assert!(m.apply(MachineEvent::Start).is_empty());
    }

    #[test]
    fn test_dispose_while_waiting_cancels_retry() {
        let mut m = machine(5);
        m.apply(MachineEvent::Start);
        m.apply(MachineEvent::SessionClosed(1));
        let effects = m.apply(MachineEvent::Dispose);

        assert_eq!(effects[0], Effect::CancelRetry);
        assert_eq!(m.state(), ConnectionState::Idle);
        assert!(m.apply(MachineEvent::RetryElapsed).is_empty());
    }

    #[test]
    fn test_transition_does_not_mutate_input() {
        let m = machine(5);
        let (next, _) = m.transition(MachineEvent::Start);
        assert_eq!(m.state(), ConnectionState::Idle);
        assert_eq!(next.state(), ConnectionState::Connecting);
    }
}
