//! Background loops driving the sweep passes.
//!
//! Each sweeper is a tokio task that checks the shared [`StopSignal`] at
//! the top of every iteration. A pass that did work is followed
//! immediately by another; an idle pass sleeps for the configured
//! interval. Store failures are logged and the loop carries on.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use keystone_core::StopSignal;
use keystone_core::config::{InvalidationConfig, SessionConfig};
use keystone_store::VersionedStore;

use crate::row_cache::RowSource;
use crate::sweep::{SweepAction, sweep_invalidations_once, sweep_sessions_once};

/// Owns the sweeper tasks and their stop signal.
#[derive(Debug, Default)]
pub struct SweeperScheduler {
    stop: Arc<StopSignal>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl SweeperScheduler {
    /// Create a scheduler with no running sweepers.
    pub fn new() -> Self {
        Self::default()
    }

    /// The signal observed by every spawned sweeper.
    pub fn stop_signal(&self) -> Arc<StopSignal> {
        Arc::clone(&self.stop)
    }

    /// Number of spawned sweepers.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no sweeper has been spawned.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Start the session sweeper.
    pub fn spawn_session_sweeper<S: VersionedStore>(&mut self, store: Arc<S>, config: SessionConfig) {
        let stop = Arc::clone(&self.stop);
        let handle = tokio::spawn(async move {
            run_session_sweeper(store.as_ref(), &config, &stop).await;
        });
        self.tasks.push(("session", handle));
    }

    /// Start the deferred-invalidation sweeper reading rows from `source`.
    pub fn spawn_invalidation_sweeper<S, R>(
        &mut self,
        store: Arc<S>,
        source: Arc<R>,
        config: InvalidationConfig,
    ) where
        S: VersionedStore,
        R: RowSource + ?Sized + 'static,
    {
        let stop = Arc::clone(&self.stop);
        let handle = tokio::spawn(async move {
            run_invalidation_sweeper(store.as_ref(), source.as_ref(), &config, &stop).await;
        });
        self.tasks.push(("invalidation", handle));
    }

    /// Signal every sweeper to stop and wait for them to exit.
    ///
    /// In-flight store calls complete before a sweeper observes the stop.
    pub async fn shutdown(self) {
        self.stop.request_stop();
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                warn!(sweeper = name, error = %e, "sweeper task failed");
            }
        }
        info!("sweepers stopped");
    }
}

/// Run the session sweeper until `stop` is requested.
pub async fn run_session_sweeper<S: VersionedStore>(
    store: &S,
    config: &SessionConfig,
    stop: &StopSignal,
) {
    info!(limit = config.limit, batch_size = config.batch_size, "session sweeper started");
    while !stop.is_stop_requested() {
        let idle = match sweep_sessions_once(store, config.limit, config.batch_size).await {
            Ok(0) => true,
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "session sweep failed");
                true
            }
        };
        if !pause(stop, idle, config.idle_interval()).await {
            break;
        }
    }
    debug!("session sweeper exiting");
}

/// Run the invalidation sweeper until `stop` is requested.
pub async fn run_invalidation_sweeper<S, R>(
    store: &S,
    source: &R,
    config: &InvalidationConfig,
    stop: &StopSignal,
) where
    S: VersionedStore,
    R: RowSource + ?Sized,
{
    info!(poll_interval_ms = config.poll_interval_ms, "invalidation sweeper started");
    while !stop.is_stop_requested() {
        let idle = match sweep_invalidations_once(store, source, Utc::now()).await {
            Ok(SweepAction::Idle) => true,
            Ok(SweepAction::Invalidated(_) | SweepAction::Refreshed(_)) => false,
            Err(e) => {
                warn!(error = %e, "invalidation sweep failed");
                true
            }
        };
        if !pause(stop, idle, config.poll_interval()).await {
            break;
        }
    }
    debug!("invalidation sweeper exiting");
}

/// Sleep after an idle pass, yield after a busy one. Returns whether to
/// keep running.
async fn pause(stop: &StopSignal, idle: bool, interval: Duration) -> bool {
    if idle {
        stop.sleep_or_stop(interval).await
    } else {
        tokio::task::yield_now().await;
        !stop.is_stop_requested()
    }
}
