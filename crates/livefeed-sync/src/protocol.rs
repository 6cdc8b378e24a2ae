//! # Push Protocol
//!
//! Frame decoding for the push channel and endpoint derivation.
//!
//! ## Frames
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Push Channel Frames                             │
//! │                                                                         │
//! │  INBOUND (server → client, JSON text)                                  │
//! │  ─────────────────────────────────────                                 │
//! │  { "id": "...", "kind": "...", ... }   → FeedEvent                     │
//! │  { "type": "welcome", ... }            → control frame, ignored        │
//! │  not JSON / not an object              → dropped with a warning        │
//! │                                                                         │
//! │  OUTBOUND (client → server)                                            │
//! │  ──────────────────────────                                            │
//! │  { "type": "ping", "timestamp": 1714564800000 }   heartbeat, one-way   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use url::Url;

use livefeed_core::FeedEvent;

use crate::error::{SyncError, SyncResult};

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Carries both `id` and `kind`: a feed event.
    Event(FeedEvent),
    /// Any other JSON object.
    Control(Value),
}

/// Decodes one inbound text frame.
pub fn decode_frame(text: &str) -> SyncResult<InboundFrame> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SyncError::InvalidFrame(format!("not JSON: {e}")))?;

    let Some(object) = value.as_object() else {
        return Err(SyncError::InvalidFrame("frame is not an object".into()));
    };

    let is_event = object.get("id").is_some_and(Value::is_string)
        && object.get("kind").is_some_and(Value::is_string);

    if !is_event {
        return Ok(InboundFrame::Control(value));
    }

    serde_json::from_value(value)
        .map(InboundFrame::Event)
        .map_err(|e| SyncError::InvalidFrame(e.to_string()))
}

/// Heartbeat frame sent on an open session.
pub fn heartbeat_frame(now: DateTime<Utc>) -> String {
    json!({ "type": "ping", "timestamp": now.timestamp_millis() }).to_string()
}

// =============================================================================
// Endpoints
// =============================================================================

/// Parses a push URL, accepting only `ws` and `wss`.
pub fn validate_push_url(url: &str) -> SyncResult<Url> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(SyncError::InvalidUrl(format!(
            "Push URL must start with ws:// or wss://, got scheme {other}"
        ))),
    }
}

/// Derives the push endpoint from a page or API origin.
///
/// `https` maps to `wss` and `http` to `ws`; `path` replaces the origin's path.
pub fn push_url_from_origin(origin: &str, path: &str) -> SyncResult<Url> {
    let mut url = Url::parse(origin)?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(SyncError::InvalidUrl(format!(
                "cannot derive a push endpoint from scheme {other}"
            )))
        }
    };

    url.set_scheme(scheme)
        .map_err(|_| SyncError::InvalidUrl(format!("cannot switch {origin} to {scheme}")))?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_frame() {
        let frame = decode_frame(r#"{"id":"e1","kind":"workout.completed","payload":{"reps":10}}"#)
            .unwrap();
        match frame {
            InboundFrame::Event(event) => {
                assert_eq!(event.id, "e1");
                assert_eq!(event.payload["reps"], 10);
            }
            other => panic!("expected event, got {other:?}"),
        }
    }

    #[test]
    fn test_frames_without_id_or_kind_are_control() {
        assert!(matches!(
            decode_frame(r#"{"type":"welcome"}"#).unwrap(),
            InboundFrame::Control(_)
        ));
        assert!(matches!(
            decode_frame(r#"{"id":"e1"}"#).unwrap(),
            InboundFrame::Control(_)
        ));
        assert!(matches!(
            decode_frame(r#"{"id":7,"kind":"x"}"#).unwrap(),
            InboundFrame::Control(_)
        ));
    }

    #[test]
    fn test_malformed_frames() {
        assert!(decode_frame("not json").is_err());
        assert!(decode_frame("[1,2]").is_err());
        assert!(decode_frame(r#"{"id":"e1","kind":"x","occurredAt":"yesterday"}"#).is_err());
    }

    #[test]
    fn test_heartbeat_frame() {
        let now = Utc::now();
        let value: Value = serde_json::from_str(&heartbeat_frame(now)).unwrap();
        assert_eq!(value["type"], "ping");
        assert_eq!(value["timestamp"], now.timestamp_millis());
    }

    #[test]
    fn test_push_url_from_origin() {
        let url = push_url_from_origin("https://app.example.com/dashboard?x=1", "/live").unwrap();
        assert_eq!(url.as_str(), "wss://app.example.com/live");

        let url = push_url_from_origin("http://localhost:3000", "/live").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:3000/live");

        assert!(push_url_from_origin("ftp://example.com", "/live").is_err());
    }

    #[test]
    fn test_validate_push_url() {
        assert!(validate_push_url("wss://example.com/live").is_ok());
        assert!(validate_push_url("https://example.com/live").is_err());
        assert!(validate_push_url("::").is_err());
    }
}
