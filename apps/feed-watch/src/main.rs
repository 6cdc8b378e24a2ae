//! # feed-watch
//!
//! Runs a feed engine and logs what a consumer would see.
//!
//! ```text
//! feed-watch <snapshot.json> [feed.toml]
//!
//! RUST_LOG=info,livefeed=debug       (default filter)
//! LIVEFEED_PUSH_URL=ws://localhost:9000/live feed-watch snapshot.json
//! ```

mod file_provider;

use anyhow::Context;
use std::future::pending;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use livefeed_sync::{FeedConfig, FeedEngine, FeedSnapshot};

use crate::file_provider::FileProvider;

const USAGE: &str = "usage: feed-watch <snapshot.json> [feed.toml]";

/// How long to wait for the engine to confirm disposal on shutdown.
const DISPOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,livefeed=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let mut args = std::env::args().skip(1);
    let snapshot_path = args.next().map(PathBuf::from).context(USAGE)?;
    let config_path = args.next().map(PathBuf::from);

    // Load configuration
    let config = FeedConfig::load(config_path).context("loading feed config")?;
    let connector = config
        .connector()
        .context("a push URL is required (push.url or LIVEFEED_PUSH_URL)")?;
    info!(
        url = %connector.url(),
        capacity = config.feed.capacity,
        max_attempts = config.push.max_attempts,
        "Configuration loaded"
    );

    let handle = FeedEngine::spawn(
        config.engine_settings(),
        Arc::new(connector),
        Arc::new(FileProvider::new(snapshot_path)),
    );
    info!(engine_id = %handle.engine_id(), "Starting feed engine");
    handle.start();

    let mut changes = handle.subscribe();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    warn!("Engine stopped unexpectedly");
                    break;
                }
                let snapshot = changes.borrow_and_update().clone();
                log_snapshot(&snapshot);
            }
            _ = &mut shutdown => break,
        }
    }

    handle.dispose();
    match tokio::time::timeout(DISPOSE_TIMEOUT, changes.wait_for(|s| s.disposed)).await {
        Ok(Ok(_)) => info!("Feed engine disposed"),
        Ok(Err(_)) => debug!("Engine already gone"),
        Err(_) => warn!("Timed out waiting for engine disposal"),
    }

    Ok(())
}

fn log_snapshot(snapshot: &FeedSnapshot) {
    info!(
        state = %snapshot.state,
        connected = snapshot.connected,
        events = snapshot.feed.len(),
        total = snapshot.stats.total,
        newest = snapshot.feed.events().first().map(|e| e.id.as_str()).unwrap_or("-"),
        "Feed updated"
    );

    if let Ok(json) = serde_json::to_string(snapshot) {
        debug!(snapshot = %json, "Feed snapshot");
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(?e, "Failed to install Ctrl+C handler");
            pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(?e, "Failed to install SIGTERM handler");
                pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, disposing feed engine...");
}
