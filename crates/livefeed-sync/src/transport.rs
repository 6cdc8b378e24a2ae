//! # Push Transport
//!
//! One WebSocket session per connection attempt. A session never retries on
//! its own: every failure ends the session with a `Closed` report and the
//! engine decides whether to open another one.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Push Session Lifecycle                               │
//! │                                                                         │
//! │  ┌────────────┐  handshake ok   ┌────────────┐                          │
//! │  │ Connecting │ ──────────────► │    Open    │ ── every heartbeat:      │
//! │  └─────┬──────┘   (Opened)      └─────┬──────┘    {"type":"ping"}       │
//! │        │                              │           (HeartbeatSent)       │
//! │        │ error / timeout              │ peer close / socket error       │
//! │        ▼                              ▼                                 │
//! │  ┌─────────────────────────────────────────────┐                        │
//! │  │ Closed (Closed(reason) reported to engine)  │                        │
//! │  └─────────────────────────────────────────────┘                        │
//! │                                                                         │
//! │  SessionHandle::close() or drop: ends the task silently, exactly once. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn, Instrument};
use url::Url;

use livefeed_core::{FeedEvent, SessionId, MIN_TIMER_PERIOD};

use crate::error::{SyncError, SyncResult};
use crate::protocol::{decode_frame, heartbeat_frame, InboundFrame};

/// Default WebSocket handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Session State & Events
// =============================================================================

/// State of a single push session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Open => write!(f, "open"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// What a session reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    Opened,
    Message(FeedEvent),
    HeartbeatSent,
    Closed(String),
}

/// A lifecycle report tagged with the session it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub kind: SessionEventKind,
}

// =============================================================================
// Session Handle
// =============================================================================

/// Owner side of a push session.
///
/// Dropping the handle closes the session.
#[derive(Debug)]
pub struct SessionHandle {
    session: SessionId,
    outgoing_tx: mpsc::UnboundedSender<String>,
    state: watch::Receiver<SessionState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl SessionHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open && self.shutdown_tx.is_some()
    }

    /// Queues a text frame. Returns false (and sends nothing) unless open.
    pub fn send(&self, text: impl Into<String>) -> bool {
        if !self.is_open() {
            debug!(session = self.session, "Dropping outbound frame, session not open");
            return false;
        }
        self.outgoing_tx.send(text.into()).is_ok()
    }

    /// Closes the session. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            debug!(session = self.session, "Push session closed by owner");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Task side of a push session.
#[derive(Debug)]
pub struct SessionLink {
    pub session: SessionId,
    pub events: mpsc::Sender<SessionEvent>,
    pub outgoing_rx: mpsc::UnboundedReceiver<String>,
    pub state: watch::Sender<SessionState>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

impl SessionLink {
    /// Reports to the owner. Returns false once the owner is gone.
    pub async fn report(&self, kind: SessionEventKind) -> bool {
        self.events
            .send(SessionEvent {
                session: self.session,
                kind,
            })
            .await
            .is_ok()
    }

    pub fn mark_open(&self) {
        self.state.send_replace(SessionState::Open);
    }

    /// Marks the session closed and reports why.
    pub async fn finish(&self, reason: impl Into<String>) {
        self.state.send_replace(SessionState::Closed);
        self.report(SessionEventKind::Closed(reason.into())).await;
    }

    /// Marks the session closed without a report (owner asked for it).
    pub fn finish_silently(&self) {
        self.state.send_replace(SessionState::Closed);
    }
}

/// Creates the two ends of a session.
pub fn session_pair(
    session: SessionId,
    events: mpsc::Sender<SessionEvent>,
) -> (SessionHandle, SessionLink) {
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let handle = SessionHandle {
        session,
        outgoing_tx,
        state: state_rx,
        shutdown_tx: Some(shutdown_tx),
    };
    let link = SessionLink {
        session,
        events,
        outgoing_rx,
        state: state_tx,
        shutdown_rx,
    };
    (handle, link)
}

// =============================================================================
// Connector
// =============================================================================

/// Opens push sessions for the engine.
///
/// `open` must not block: it spawns the session task and returns the handle.
/// Every outcome, including a failed handshake, arrives as a [`SessionEvent`].
pub trait PushConnector: Send + Sync + 'static {
    fn open(
        &self,
        session: SessionId,
        heartbeat: Duration,
        events: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle;
}

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL to connect to.
    pub url: Url,

    /// Handshake timeout.
    pub connect_timeout: Duration,
}

impl TransportConfig {
    pub fn new(url: Url) -> Self {
        TransportConfig {
            url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    config: TransportConfig,
}

impl WsConnector {
    pub fn new(config: TransportConfig) -> Self {
        WsConnector { config }
    }

    pub fn url(&self) -> &Url {
        &self.config.url
    }
}

impl PushConnector for WsConnector {
    fn open(
        &self,
        session: SessionId,
        heartbeat: Duration,
        events: mpsc::Sender<SessionEvent>,
    ) -> SessionHandle {
        let (handle, link) = session_pair(session, events);
        let task = WsSession {
            config: self.config.clone(),
            heartbeat,
            link,
        };
        tokio::spawn(task.run().instrument(tracing::Span::current()));
        handle
    }
}

// =============================================================================
// WebSocket Session Task
// =============================================================================

enum LoopExit {
    /// Owner closed the session.
    Shutdown,
    /// Peer closed or the stream ended.
    Remote(String),
}

struct WsSession {
    config: TransportConfig,
    heartbeat: Duration,
    link: SessionLink,
}

impl WsSession {
    async fn run(mut self) {
        let session = self.link.session;
        debug!(session, url = %self.config.url, "Opening push session");

        let connected = tokio::select! {
            result = connect_with_timeout(&self.config) => result,
            _ = &mut self.link.shutdown_rx => {
                debug!(session, "Push session closed during handshake");
                self.link.finish_silently();
                return;
            }
        };

        let ws_stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                error!(session, error = %e, "Push connection failed");
                self.link.finish(e.to_string()).await;
                return;
            }
        };

        self.link.mark_open();
        info!(session, "Push session open");
        if !self.link.report(SessionEventKind::Opened).await {
            self.link.finish_silently();
            return;
        }

        match self.connection_loop(ws_stream).await {
            Ok(LoopExit::Shutdown) => self.link.finish_silently(),
            Ok(LoopExit::Remote(reason)) => {
                info!(session, reason = %reason, "Push session ended by peer");
                self.link.finish(reason).await;
            }
            Err(e) => {
                error!(session, error = %e, "Push session failed");
                self.link.finish(e.to_string()).await;
            }
        }
    }

    /// Handles sending, receiving and heartbeats until the session ends.
    async fn connection_loop(
        &mut self,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    ) -> SyncResult<LoopExit> {
        let session = self.link.session;
        let (mut write, mut read) = ws_stream.split();

        let period = self.heartbeat.max(MIN_TIMER_PERIOD);
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut self.link.shutdown_rx => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(LoopExit::Shutdown);
                }

                Some(text) = self.link.outgoing_rx.recv() => {
                    debug!(session, "Sending frame");
                    write.send(WsMessage::Text(text.into())).await?;
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => match decode_frame(text.as_str()) {
                            Ok(InboundFrame::Event(event)) => {
                                debug!(session, id = %event.id, kind = %event.kind, "Received event");
                                if !self.link.report(SessionEventKind::Message(event)).await {
                                    return Ok(LoopExit::Shutdown);
                                }
                            }
                            Ok(InboundFrame::Control(_)) => {
                                debug!(session, "Ignoring control frame");
                            }
                            Err(e) => {
                                warn!(session, error = %e, "Dropping malformed frame");
                            }
                        },
                        Some(Ok(WsMessage::Ping(data))) => {
                            write.send(WsMessage::Pong(data)).await?;
                        }
                        Some(Ok(WsMessage::Pong(_))) => {}
                        Some(Ok(WsMessage::Close(frame))) => {
                            let reason = frame
                                .map(|f| format!("close {}: {}", u16::from(f.code), f.reason.as_str()))
                                .unwrap_or_else(|| "closed by peer".to_string());
                            return Ok(LoopExit::Remote(reason));
                        }
                        Some(Ok(WsMessage::Binary(_))) => {
                            warn!(session, "Dropping unexpected binary frame");
                        }
                        Some(Ok(WsMessage::Frame(_))) => {}
                        Some(Err(e)) => return Err(SyncError::from(e)),
                        None => return Ok(LoopExit::Remote("stream ended".to_string())),
                    }
                }

                _ = heartbeat.tick() => {
                    write
                        .send(WsMessage::Text(heartbeat_frame(chrono::Utc::now()).into()))
                        .await?;
                    debug!(session, "Sent heartbeat");
                    if !self.link.report(SessionEventKind::HeartbeatSent).await {
                        return Ok(LoopExit::Shutdown);
                    }
                }
            }
        }
    }
}

/// Connects with timeout.
async fn connect_with_timeout(
    config: &TransportConfig,
) -> SyncResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    match timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
        Ok(Ok((ws_stream, response))) => {
            debug!(status = ?response.status(), "WebSocket handshake complete");
            Ok(ws_stream)
        }
        Ok(Err(e)) => Err(SyncError::from(e)),
        Err(_) => Err(SyncError::Timeout(config.connect_timeout.as_secs())),
    }
}
