//! Keystone daemon.
//!
//! Runs the background sweepers against a Dragonfly instance: the session
//! sweeper keeps the number of tracked sessions under the configured limit,
//! and the invalidation sweeper refreshes or drops cached rows as they fall
//! due. Transactional work is done by the library crates embedded in the
//! application; the daemon only owns the sweepers.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from the file named on the command line (or in
//!    `KEYSTONE_CONFIG`), layered under `KEYSTONE__*` variables
//! 2. Initialize structured logging (tracing)
//! 3. Connect to Dragonfly
//! 4. Spawn the session and invalidation sweepers
//! 5. Wait for Ctrl-C
//! 6. Stop the sweepers and wait for them to exit
//!
//! Logging comes up after configuration because the configured level is
//! the default filter; a configuration error is reported by `main`.

mod error;
mod rows;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use keystone_core::KeystoneConfig;
use keystone_core::config::LoggingConfig;
use keystone_store::DragonflyStore;
use keystone_sweeper::SweeperScheduler;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::DaemonError;
use crate::rows::RowFiles;

/// Application entry point for the Keystone daemon.
///
/// # Errors
///
/// Returns an error if configuration, logging, the store connection, or
/// the signal handler fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration.
    let config_path = config_path();
    let config = KeystoneConfig::load(config_path.as_deref())
        .map_err(DaemonError::from)
        .context("loading configuration")?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging).context("initializing logging")?;
    info!(
        config = ?config_path,
        store = config.store.url,
        watch_pool_size = config.store.watch_pool_size,
        "keystone-daemon starting"
    );

    // 3. Connect to Dragonfly.
    let store = DragonflyStore::connect(&config.store.url, config.store.watch_pool_size)
        .await
        .map_err(DaemonError::from)
        .with_context(|| format!("connecting to {}", config.store.url))?;
    let store = Arc::new(store);

    // 4. Spawn the sweepers.
    let mut scheduler = SweeperScheduler::new();
    scheduler.spawn_session_sweeper(Arc::clone(&store), config.sessions.clone());
    let rows = Arc::new(RowFiles::new(config.invalidation.row_dir.clone()));
    scheduler.spawn_invalidation_sweeper(Arc::clone(&store), rows, config.invalidation.clone());
    info!(sweepers = scheduler.len(), "Sweepers running");

    // 5. Wait for Ctrl-C.
    let signal = wait_for_shutdown().await;

    // 6. Stop the sweepers even if the signal handler failed.
    info!("Shutting down");
    scheduler.shutdown().await;
    signal.context("waiting for shutdown signal")?;

    info!("keystone-daemon stopped");
    Ok(())
}

/// Config file path from the first argument, else `KEYSTONE_CONFIG`.
fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("KEYSTONE_CONFIG"))
        .map(PathBuf::from)
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(logging: &LoggingConfig) -> Result<(), DaemonError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| DaemonError::Logging {
        message: e.to_string(),
    })
}

async fn wait_for_shutdown() -> Result<(), DaemonError> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
