//! # Feed Configuration
//!
//! Configuration management for the feed engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     LIVEFEED_PUSH_URL=wss://feed.example.com/live                      │
//! │     LIVEFEED_MAX_ATTEMPTS=5                                            │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/livefeed/feed.toml (Linux)                               │
//! │     ~/Library/Application Support/dev.livefeed.livefeed/feed.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     5 attempts, 3s retry, 30s poll, 30s heartbeat, 50 events           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # feed.toml
//! [push]
//! url = "wss://feed.example.com/live"
//! max_attempts = 5
//! retry_delay_ms = 3000
//! strategy = "constant"      # constant | exponential
//! heartbeat_ms = 30000
//! budget_reset = "on_open"   # or { after_heartbeats = 2 }
//!
//! [poll]
//! interval_ms = 30000
//!
//! [feed]
//! capacity = 50
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use livefeed_core::{Backoff, BackoffStrategy, BudgetReset};

use crate::engine::EngineSettings;
use crate::error::{SyncError, SyncResult};
use crate::protocol::validate_push_url;
use crate::transport::{TransportConfig, WsConnector};

// =============================================================================
// Push Settings
// =============================================================================

/// Push channel and reconnect behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSettings {
    /// WebSocket endpoint (`ws://` or `wss://`).
    #[serde(default)]
    pub url: Option<String>,

    /// Reconnect attempts before falling back to polling.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between reconnect attempts (milliseconds).
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Upper bound for exponential delays (milliseconds).
    #[serde(default = "default_retry_cap")]
    pub retry_cap_ms: u64,

    /// Delay growth between attempts.
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Heartbeat interval on an open session (milliseconds).
    #[serde(default = "default_heartbeat")]
    pub heartbeat_ms: u64,

    /// WebSocket handshake timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// When a healthy session clears the retry budget.
    #[serde(default)]
    pub budget_reset: BudgetReset,
}

fn default_max_attempts() -> u32 {
    livefeed_core::DEFAULT_MAX_ATTEMPTS
}
fn default_retry_delay() -> u64 {
    3_000
}
fn default_retry_cap() -> u64 {
    60_000
}
fn default_heartbeat() -> u64 {
    30_000
}
fn default_connect_timeout() -> u64 {
    10
}

impl Default for PushSettings {
    fn default() -> Self {
        PushSettings {
            url: None,
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay(),
            retry_cap_ms: default_retry_cap(),
            strategy: BackoffStrategy::default(),
            heartbeat_ms: default_heartbeat(),
            connect_timeout_secs: default_connect_timeout(),
            budget_reset: BudgetReset::default(),
        }
    }
}

// =============================================================================
// Poll Settings
// =============================================================================

/// Snapshot polling cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSettings {
    /// Interval while the push channel is still being attempted (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    /// Interval after the push channel gave up. Defaults to `interval_ms`.
    #[serde(default)]
    pub fallback_interval_ms: Option<u64>,
}

fn default_poll_interval() -> u64 {
    30_000
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            interval_ms: default_poll_interval(),
            fallback_interval_ms: None,
        }
    }
}

// =============================================================================
// Feed Settings
// =============================================================================

/// Window sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSettings {
    /// Maximum number of events kept in the window.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    livefeed_core::DEFAULT_CAPACITY
}

impl Default for FeedSettings {
    fn default() -> Self {
        FeedSettings {
            capacity: default_capacity(),
        }
    }
}

// =============================================================================
// Main Feed Configuration
// =============================================================================

/// Complete feed configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Push channel settings.
    #[serde(default)]
    pub push: PushSettings,

    /// Poller settings.
    #[serde(default)]
    pub poll: PollSettings,

    /// Window settings.
    #[serde(default)]
    pub feed: FeedSettings,
}

impl FeedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (feed.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading feed config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load feed config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Feed config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if let Some(ref url) = self.push.url {
            validate_push_url(url)?;
        }

        if self.poll.interval_ms == 0 || self.poll.fallback_interval_ms == Some(0) {
            return Err(SyncError::InvalidConfig(
                "poll intervals must be greater than 0".into(),
            ));
        }

        if self.push.heartbeat_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "heartbeat_ms must be greater than 0".into(),
            ));
        }

        if self.push.connect_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies `LIVEFEED_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("LIVEFEED_PUSH_URL") {
            debug!(url = %url, "Overriding push URL from environment");
            self.push.url = Some(url);
        }

        if let Some(value) = lookup("LIVEFEED_MAX_ATTEMPTS") {
            match value.parse() {
                Ok(n) => self.push.max_attempts = n,
                Err(_) => warn!(value = %value, "Ignoring invalid LIVEFEED_MAX_ATTEMPTS"),
            }
        }

        if let Some(value) = lookup("LIVEFEED_RETRY_DELAY_MS") {
            match value.parse() {
                Ok(ms) => self.push.retry_delay_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid LIVEFEED_RETRY_DELAY_MS"),
            }
        }

        if let Some(value) = lookup("LIVEFEED_POLL_INTERVAL_MS") {
            match value.parse() {
                Ok(ms) => self.poll.interval_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid LIVEFEED_POLL_INTERVAL_MS"),
            }
        }

        if let Some(value) = lookup("LIVEFEED_HEARTBEAT_MS") {
            match value.parse() {
                Ok(ms) => self.push.heartbeat_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid LIVEFEED_HEARTBEAT_MS"),
            }
        }

        if let Some(value) = lookup("LIVEFEED_CAPACITY") {
            match value.parse() {
                Ok(n) => self.feed.capacity = n,
                Err(_) => warn!(value = %value, "Ignoring invalid LIVEFEED_CAPACITY"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "livefeed", "livefeed")
            .map(|dirs| dirs.config_dir().join("feed.toml"))
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// Runtime settings for the engine.
    pub fn engine_settings(&self) -> EngineSettings {
        let backoff = Backoff::from_strategy(
            self.push.strategy,
            Duration::from_millis(self.push.retry_delay_ms),
            Duration::from_millis(self.push.retry_cap_ms),
        )
        .with_heartbeat(Duration::from_millis(self.push.heartbeat_ms));

        let poll_interval = Duration::from_millis(self.poll.interval_ms);
        let fallback_interval = self
            .poll
            .fallback_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(poll_interval);

        EngineSettings {
            max_attempts: self.push.max_attempts,
            backoff,
            budget_reset: self.push.budget_reset,
            poll_interval,
            fallback_interval,
            capacity: self.feed.capacity,
        }
    }

    /// WebSocket connector for the configured push URL.
    pub fn connector(&self) -> SyncResult<WsConnector> {
        let url = self
            .push
            .url
            .as_deref()
            .ok_or_else(|| SyncError::InvalidConfig("push.url is required".into()))?;

        Ok(WsConnector::new(TransportConfig {
            url: validate_push_url(url)?,
            connect_timeout: Duration::from_secs(self.push.connect_timeout_secs),
        }))
    }

    /// Returns the push URL if configured.
    pub fn push_url(&self) -> Option<&str> {
        self.push.url.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = FeedConfig::default();
        assert_eq!(config.push.max_attempts, 5);
        assert_eq!(config.push.retry_delay_ms, 3_000);
        assert_eq!(config.poll.interval_ms, 30_000);
        assert_eq!(config.push.heartbeat_ms, 30_000);
        assert_eq!(config.feed.capacity, 50);
        assert_eq!(config.push.budget_reset, BudgetReset::OnOpen);
    }

    #[test]
    fn test_config_validation() {
        let mut config = FeedConfig::default();
        assert!(config.validate().is_ok());

        config.push.url = Some("http://invalid".to_string());
        assert!(config.validate().is_err());

        config.push.url = Some("wss://feed.example.com/live".to_string());
        assert!(config.validate().is_ok());

        config.poll.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_is_valid() {
        let mut config = FeedConfig::default();
        config.feed.capacity = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("LIVEFEED_PUSH_URL", "ws://localhost:9000/feed"),
            ("LIVEFEED_MAX_ATTEMPTS", "2"),
            ("LIVEFEED_POLL_INTERVAL_MS", "not-a-number"),
            ("LIVEFEED_CAPACITY", "10"),
        ]);

        let mut config = FeedConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.push_url(), Some("ws://localhost:9000/feed"));
        assert_eq!(config.push.max_attempts, 2);
        assert_eq!(config.poll.interval_ms, 30_000);
        assert_eq!(config.feed.capacity, 10);
    }

    #[test]
    fn test_partial_toml() {
        let config: FeedConfig = toml::from_str(
            r#"
            [push]
            url = "ws://localhost:9000"
            strategy = "exponential"

            [push.budget_reset]
            after_heartbeats = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.push.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.push.budget_reset, BudgetReset::AfterHeartbeats(3));
        assert_eq!(config.poll.interval_ms, 30_000);
    }

    #[test]
    fn test_engine_settings_conversion() {
        let mut config = FeedConfig::default();
        config.poll.fallback_interval_ms = Some(60_000);
        let settings = config.engine_settings();

        assert_eq!(settings.poll_interval, Duration::from_secs(30));
        assert_eq!(settings.fallback_interval, Duration::from_secs(60));
        assert_eq!(settings.backoff.next_delay(4), Duration::from_secs(3));
        assert_eq!(settings.backoff.heartbeat_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_connector_requires_url() {
        assert!(FeedConfig::default().connector().is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let config = FeedConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[push]"));
        assert!(toml_str.contains("[poll]"));
        assert!(toml_str.contains("[feed]"));
    }
}
