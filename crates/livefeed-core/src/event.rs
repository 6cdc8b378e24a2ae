//! # Feed Events
//!
//! The unit of the live feed. Events arrive from two places:
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Event Sources                                   │
//! │                                                                         │
//! │  ┌─────────────────┐                      ┌─────────────────┐           │
//! │  │  Push (socket)  │──► FeedEvent ◄───────│  Poll (snapshot)│           │
//! │  └─────────────────┘         │            └─────────────────┘           │
//! │                              ▼                                          │
//! │                     identity = `id` only                                │
//! │            (same id from both sources = same logical event)             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// =============================================================================
// Feed Event
// =============================================================================

/// A single entry of the shared activity stream.
///
/// `payload` is opaque to the engine; only `id` participates in identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FeedEvent {
    /// Unique event identifier.
    pub id: String,

    /// Event kind (e.g. "workout.completed").
    pub kind: String,

    /// Opaque event body.
    #[serde(default)]
    #[ts(type = "unknown")]
    pub payload: serde_json::Value,

    /// When the event happened. Frames without a timestamp get the
    /// time they were decoded.
    #[serde(default = "Utc::now", alias = "occurred_at")]
    #[ts(as = "String")]
    pub occurred_at: DateTime<Utc>,
}

impl FeedEvent {
    /// Creates an event with an explicit timestamp.
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        FeedEvent {
            id: id.into(),
            kind: kind.into(),
            payload,
            occurred_at,
        }
    }
}

// =============================================================================
// Event Source
// =============================================================================

/// Where a batch of events came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    /// Received over the push channel (local, authoritative on conflicts).
    Push,
    /// Returned by the snapshot provider.
    Poll,
}

impl std::fmt::Display for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSource::Push => write!(f, "push"),
            EventSource::Poll => write!(f, "poll"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_camel_case() {
        let event: FeedEvent = serde_json::from_value(json!({
            "id": "evt-1",
            "kind": "workout.completed",
            "payload": { "user": "u-9" },
            "occurredAt": "2024-05-01T12:00:00Z"
        }))
        .unwrap();

        assert_eq!(event.id, "evt-1");
        assert_eq!(event.payload["user"], "u-9");
        assert_eq!(event.occurred_at.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_missing_payload_and_timestamp_default() {
        let before = Utc::now();
        let event: FeedEvent =
            serde_json::from_value(json!({ "id": "evt-2", "kind": "level.up" })).unwrap();

        assert!(event.payload.is_null());
        assert!(event.occurred_at >= before);
    }

    #[test]
    fn test_source_display() {
        assert_eq!(EventSource::Push.to_string(), "push");
        assert_eq!(EventSource::Poll.to_string(), "poll");
    }
}
