//! # livefeed-core: Pure Feed Logic
//!
//! Everything the live feed engine decides, without doing any of it.
//! This crate never touches a socket, a timer or a task.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        livefeed Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Consumer (UI / CLI)                          │   │
//! │  │        reads FeedWindow, AggregateStats, ConnectionState        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ watch snapshots                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              livefeed-sync (engine actor, I/O)                  │   │
//! │  │      WebSocket session ── fallback poller ── retry timer        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ livefeed-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   event   │  │  window   │  │  backoff  │  │  machine  │  │   │
//! │  │   │ FeedEvent │  │FeedWindow │  │  Backoff  │  │SyncMachine│  │   │
//! │  │   │           │  │MergeLayer │  │           │  │  Effect   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO TIMERS • NO NETWORK • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`event`] - `FeedEvent` and where it came from
//! - [`window`] - Bounded, deduplicated merge of push and poll events
//! - [`stats`] - Aggregate counters shown next to the feed
//! - [`backoff`] - Reconnect delay and heartbeat timing
//! - [`machine`] - Connection state machine returning effects
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::Utc;
//! use livefeed_core::{EventSource, FeedEvent, MergeLayer};
//!
//! let mut layer = MergeLayer::new(3);
//! let ev = |id: &str| FeedEvent::new(id, "demo", serde_json::Value::Null, Utc::now());
//!
//! layer.ingest(vec![ev("A"), ev("B")], EventSource::Push);
//! layer.ingest(vec![ev("B"), ev("C"), ev("D")], EventSource::Poll);
//!
//! assert_eq!(layer.view().ids(), vec!["A", "B", "C"]);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backoff;
pub mod event;
pub mod machine;
pub mod stats;
pub mod window;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use backoff::{Backoff, BackoffStrategy};
pub use event::{EventSource, FeedEvent};
pub use machine::{
    BudgetReset, ConnectionState, Effect, MachineEvent, Phase, PollCadence, RetryBudget,
    SessionId, SyncMachine,
};
pub use stats::AggregateStats;
pub use window::{FeedWindow, MergeLayer};

// =============================================================================
// Crate-Level Constants
// =============================================================================

pub use backoff::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RETRY_DELAY, MIN_TIMER_PERIOD};
pub use machine::DEFAULT_MAX_ATTEMPTS;
pub use window::DEFAULT_CAPACITY;

/// Default interval between provider snapshot fetches.
pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(30_000);
