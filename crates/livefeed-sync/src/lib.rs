//! # livefeed-sync: Feed Synchronization Engine
//!
//! Keeps a client-side view of a shared activity stream current over a
//! WebSocket push channel, with snapshot polling as a safety net and
//! fallback.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Feed Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                    FeedEngine (engine actor)                     │  │
//! │  │                                                                  │  │
//! │  │  Spawned as a tokio task, driven through FeedHandle             │  │
//! │  │  Applies SyncMachine effects, owns every timer                   │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  PushConnector │  │     Poller     │  │   SnapshotProvider     │    │
//! │  │                │  │                │  │                        │    │
//! │  │ One WebSocket  │  │ Immediate +    │  │ External snapshot and  │    │
//! │  │ session per    │  │ interval fetch │  │ stats queries          │    │
//! │  │ attempt        │  │                │  │                        │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  CONSUMERS read FeedSnapshot through a watch channel:                  │
//! │  feed window • aggregate stats • connection state • connected flag     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - `FeedEngine` actor and `FeedHandle`
//! - [`transport`] - Push sessions and the WebSocket connector
//! - [`poller`] - Interval snapshot fetching
//! - [`provider`] - The `SnapshotProvider` trait
//! - [`protocol`] - Frame decoding, heartbeat frame, push URLs
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Sync error types
//! - `testing` - Scripted connector and in-memory provider (`testing` feature)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use livefeed_sync::{FeedConfig, FeedEngine};
//!
//! let config = FeedConfig::load_or_default(None);
//! let handle = FeedEngine::spawn(
//!     config.engine_settings(),
//!     Arc::new(config.connector()?),
//!     Arc::new(my_provider),
//! );
//!
//! handle.start();
//! let mut changes = handle.subscribe();
//! while changes.changed().await.is_ok() {
//!     println!("{} events, connected: {}", handle.feed().len(), handle.connected());
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod provider;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{FeedConfig, FeedSettings, PollSettings, PushSettings};
pub use engine::{EngineSettings, FeedEngine, FeedHandle, FeedSnapshot};
pub use error::{SyncError, SyncResult};
pub use protocol::{push_url_from_origin, InboundFrame};
pub use provider::SnapshotProvider;
pub use transport::{
    PushConnector, SessionEvent, SessionEventKind, SessionHandle, SessionState,
    TransportConfig, WsConnector,
};

pub use livefeed_core::{AggregateStats, ConnectionState, FeedEvent, FeedWindow};
