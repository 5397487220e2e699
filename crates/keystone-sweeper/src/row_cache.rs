//! Scheduled caching of database rows.
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `delay:` | sorted set | row id scored by refresh delay in seconds |
//! | `schedule:` | sorted set | row id scored by next due time (Unix seconds) |
//! | `inv:<row>` | string | the cached row as JSON |
//!
//! A row with a positive delay is refreshed from its [`RowSource`] every
//! `delay` seconds. Setting the delay to zero or less makes the next sweep
//! drop it from the cache.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use keystone_store::{KeyReader, Op, StoreError, VersionedStore, WriteBatch};

use crate::clock::unix_seconds;

/// Sorted set of refresh delays.
pub const DELAY: &str = "delay:";

/// Sorted set of due times.
pub const SCHEDULE: &str = "schedule:";

/// Cached copy of `row_id`.
pub fn cached_row_key(row_id: &str) -> String {
    format!("inv:{row_id}")
}

/// Loads the current version of a row from the system of record.
pub trait RowSource: Send + Sync {
    /// The row's current contents, or `None` if it no longer exists.
    fn load(&self, row_id: &str) -> Option<Value>;
}

impl<F> RowSource for F
where
    F: Fn(&str) -> Option<Value> + Send + Sync,
{
    fn load(&self, row_id: &str) -> Option<Value> {
        self(row_id)
    }
}

/// Schedules rows for caching and reads cached copies.
#[derive(Debug, Clone)]
pub struct RowCache<S> {
    store: Arc<S>,
}

impl<S: VersionedStore> RowCache<S> {
    /// Wrap `store`.
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Cache `row_id`, refreshing every `delay_seconds`. The first load is
    /// due immediately.
    pub async fn schedule_row_cache(&self, row_id: &str, delay_seconds: f64) -> Result<(), StoreError> {
        self.schedule_row_cache_at(Utc::now(), row_id, delay_seconds)
            .await
    }

    /// [`schedule_row_cache`](Self::schedule_row_cache) with an explicit
    /// clock reading.
    pub async fn schedule_row_cache_at(
        &self,
        now: DateTime<Utc>,
        row_id: &str,
        delay_seconds: f64,
    ) -> Result<(), StoreError> {
        self.store
            .apply(
                WriteBatch::new()
                    .with(Op::ZAdd {
                        key: DELAY.to_owned(),
                        member: row_id.to_owned(),
                        score: delay_seconds,
                    })
                    .with(Op::ZAdd {
                        key: SCHEDULE.to_owned(),
                        member: row_id.to_owned(),
                        score: unix_seconds(now),
                    }),
            )
            .await?;
        Ok(())
    }

    /// The cached copy of `row_id`, if present.
    pub async fn cached_row(&self, row_id: &str) -> Result<Option<Value>, StoreError> {
        let key = cached_row_key(row_id);
        match self.store.get(&key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Malformed {
                    key,
                    detail: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// When `row_id` is next due, in Unix seconds.
    pub async fn next_due(&self, row_id: &str) -> Result<Option<f64>, StoreError> {
        self.store.zscore(SCHEDULE, row_id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use chrono::TimeZone;
    use keystone_store::MemoryStore;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn scheduling_records_delay_and_due_time() {
        let store = Arc::new(MemoryStore::new());
        let cache = RowCache::new(Arc::clone(&store));
        let now = Utc.timestamp_opt(1_000, 0).single().unwrap();

        cache.schedule_row_cache_at(now, "row1", 30.0).await.unwrap();

        assert_eq!(store.zscore(DELAY, "row1").await.unwrap(), Some(30.0));
        assert_eq!(cache.next_due("row1").await.unwrap(), Some(1_000.0));
        assert_eq!(cache.cached_row("row1").await.unwrap(), None);
    }

    #[test]
    fn closures_are_row_sources() {
        let source = |id: &str| (id == "row1").then(|| json!({ "id": id }));
        assert_eq!(source.load("row1"), Some(json!({ "id": "row1" })));
        assert_eq!(source.load("row2"), None);
    }
}
