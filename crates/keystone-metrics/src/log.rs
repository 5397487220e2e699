//! The [`MetricLog`] entry points.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use keystone_core::config::TransactionConfig;
use keystone_core::{TransactionCoordinator, TxOutcome};
use keystone_store::{KeyReader, StoreError, VersionedStore, WriteBatch};

use crate::rotation::{MetricKeys, RecordMetric, Recorded, push_recent, recent_entry};
use crate::severity::Severity;

/// Message counters and recent logs stored alongside the application data.
#[derive(Debug, Clone)]
pub struct MetricLog<S> {
    coordinator: TransactionCoordinator<S>,
    window: Duration,
}

impl<S: VersionedStore> MetricLog<S> {
    /// Create a log with a 5 second record window.
    pub fn new(coordinator: TransactionCoordinator<S>) -> Self {
        Self {
            coordinator,
            window: Duration::from_secs(5),
        }
    }

    /// Create a log using the configured record window.
    pub fn from_config(coordinator: TransactionCoordinator<S>, config: &TransactionConfig) -> Self {
        Self::new(coordinator).with_window(config.metric_window())
    }

    /// Override the record window.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Count `message` in the current hour's bucket, rolling the bucket
    /// over first if the hour has changed.
    pub async fn record_and_maybe_rotate(
        &self,
        name: &str,
        severity: Severity,
        message: &str,
    ) -> Result<TxOutcome<Recorded>, StoreError> {
        self.record_at(Utc::now(), name, severity, message).await
    }

    /// [`record_and_maybe_rotate`](Self::record_and_maybe_rotate) with an
    /// explicit clock reading.
    pub async fn record_at(
        &self,
        now: DateTime<Utc>,
        name: &str,
        severity: Severity,
        message: &str,
    ) -> Result<TxOutcome<Recorded>, StoreError> {
        let body = RecordMetric::new(MetricKeys::new(name, severity), message, now);
        let outcome = self.coordinator.run(self.window, body).await?;
        if let TxOutcome::Committed(Recorded {
            rotated: true,
            hour_start,
            ..
        }) = &outcome
        {
            info!(name, %severity, hour = %hour_start, "metric bucket rotated");
        }
        debug!(name, %severity, outcome = outcome.label(), "record metric");
        Ok(outcome)
    }

    /// Push a timestamped `message` onto the recent list, keeping the newest
    /// 100 entries.
    pub async fn log_recent(
        &self,
        name: &str,
        severity: Severity,
        message: &str,
    ) -> Result<(), StoreError> {
        let keys = MetricKeys::new(name, severity);
        let batch = WriteBatch::from(Vec::from(push_recent(
            &keys.recent,
            recent_entry(Utc::now(), message),
        )));
        self.coordinator.store().apply(batch).await?;
        Ok(())
    }

    /// Recent messages, newest first.
    pub async fn recent(&self, name: &str, severity: Severity) -> Result<Vec<String>, StoreError> {
        let keys = MetricKeys::new(name, severity);
        self.coordinator.store().lrange(&keys.recent, 0, -1).await
    }

    /// Counts in the current hour's bucket, lowest first.
    pub async fn current_counts(
        &self,
        name: &str,
        severity: Severity,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let keys = MetricKeys::new(name, severity);
        self.coordinator
            .store()
            .zrange_withscores(&keys.bucket, 0, -1)
            .await
    }

    /// Counts in the previous hour's bucket, lowest first.
    pub async fn last_counts(
        &self,
        name: &str,
        severity: Severity,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let keys = MetricKeys::new(name, severity);
        self.coordinator
            .store()
            .zrange_withscores(&keys.last, 0, -1)
            .await
    }

    /// Start of the current bucket's hour, if any message was recorded.
    pub async fn current_hour(
        &self,
        name: &str,
        severity: Severity,
    ) -> Result<Option<String>, StoreError> {
        let keys = MetricKeys::new(name, severity);
        self.coordinator.store().get(&keys.start).await
    }

    /// Start of the previous bucket's hour, if a rotation has happened.
    pub async fn previous_hour(
        &self,
        name: &str,
        severity: Severity,
    ) -> Result<Option<String>, StoreError> {
        let keys = MetricKeys::new(name, severity);
        self.coordinator.store().get(&keys.pstart).await
    }
}
