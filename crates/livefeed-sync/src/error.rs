//! # Sync Error Types
//!
//! Error types for feed synchronization.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Protocol            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  InvalidFrame           │ │
//! │  │  InvalidUrl     │  │  Disconnected   │  │  SerializationFailed    │ │
//! │  │  ConfigLoad/Save│  │  Timeout        │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────────────────────────────────┐  │
//! │  │    Provider     │  │     Engine                                  │  │
//! │  │                 │  │                                             │  │
//! │  │  ProviderFailed │  │  ShuttingDown                               │  │
//! │  └─────────────────┘  └─────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport errors never cross the engine boundary: they become session
//! `Closed` reports. Only `FeedHandle::refresh` returns an error to callers.

use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Every failure the sync layer can produce.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid feed configuration.
    #[error("Invalid feed configuration: {0}")]
    InvalidConfig(String),

    /// Invalid push URL.
    #[error("Invalid push URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Failed to establish WebSocket connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket closed by the peer.
    #[error("Disconnected from push endpoint")]
    Disconnected,

    /// Connection timeout.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Inbound frame could not be decoded.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Failed to serialize an outbound frame.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// Snapshot or stats provider failed.
    #[error("Snapshot provider failed: {0}")]
    ProviderFailed(String),

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// Engine has been disposed.
    #[error("Feed engine is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}
