//! Hourly counter buckets with atomic rollover.
//!
//! Each `(name, severity)` pair owns:
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `common:<name>:<severity>` | sorted set | message -> count for the current hour |
//! | `common:<name>:<severity>:start` | string | current hour, `YYYY-MM-DDTHH:00:00` |
//! | `common:<name>:<severity>:last` | sorted set | the previous hour's counts |
//! | `common:<name>:<severity>:pstart` | string | the previous hour |
//! | `recent:<name>:<severity>` | list | last 100 timestamped messages |
//!
//! Only `:start` is watched. Every writer that finds it stale tries to
//! rotate, so exactly one rotation commits per boundary and the others
//! retry against the fresh `:start`.

use chrono::{DateTime, Utc};

use keystone_core::{Plan, Transaction};
use keystone_store::{KeyReader, Op, Reply, StoreError, VersionedStore, WriteBatch};

use crate::severity::Severity;

/// Entries kept in each recent-message list.
pub const RECENT_LIMIT: i64 = 100;
const RECENT_LAST_INDEX: i64 = RECENT_LIMIT - 1;

/// Keys for one `(name, severity)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricKeys {
    /// Current counter bucket.
    pub bucket: String,
    /// Start of the current bucket's hour.
    pub start: String,
    /// Previous hour's bucket.
    pub last: String,
    /// Start of the previous hour.
    pub pstart: String,
    /// Recent-message list.
    pub recent: String,
}

impl MetricKeys {
    /// Keys for `name` at `severity`.
    pub fn new(name: &str, severity: Severity) -> Self {
        let bucket = format!("common:{name}:{severity}");
        Self {
            start: format!("{bucket}:start"),
            last: format!("{bucket}:last"),
            pstart: format!("{bucket}:pstart"),
            recent: format!("recent:{name}:{severity}"),
            bucket,
        }
    }
}

/// Hour boundary containing `now`, as stored in `:start`.
pub fn hour_start(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:00:00").to_string()
}

/// A recent-list entry: timestamp, a space, then the message.
pub fn recent_entry(now: DateTime<Utc>, message: &str) -> String {
    format!("{} {message}", now.format("%Y-%m-%dT%H:%M:%S"))
}

/// Ops appending `entry` to a recent list and trimming it.
pub fn push_recent(recent: &str, entry: String) -> [Op; 2] {
    [
        Op::LPush {
            key: recent.to_owned(),
            value: entry,
        },
        Op::LTrim {
            key: recent.to_owned(),
            start: 0,
            stop: RECENT_LAST_INDEX,
        },
    ]
}

/// Result of a committed record.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    /// Whether this call performed the hourly rollover.
    pub rotated: bool,
    /// Hour the message was counted in.
    pub hour_start: String,
    /// The message's count in that hour after the increment.
    pub count: f64,
}

/// Count one message, rotating the bucket first if its hour has passed.
#[derive(Debug, Clone)]
pub struct RecordMetric {
    keys: MetricKeys,
    message: String,
    hour_start: String,
    entry: String,
    rotated: bool,
    incr_index: usize,
}

impl RecordMetric {
    /// Record `message` under `keys` as of `now`.
    pub fn new(keys: MetricKeys, message: &str, now: DateTime<Utc>) -> Self {
        Self {
            keys,
            message: message.to_owned(),
            hour_start: hour_start(now),
            entry: recent_entry(now, message),
            rotated: false,
            incr_index: 0,
        }
    }
}

impl<S: VersionedStore> Transaction<S> for RecordMetric {
    type Output = Recorded;

    fn name(&self) -> &'static str {
        "record_metric"
    }

    fn watch_keys(&self) -> Vec<String> {
        vec![self.keys.start.clone()]
    }

    async fn plan(&mut self, txn: &S::Txn) -> Result<Plan, StoreError> {
        let keys = &self.keys;
        let existing = txn.get(&keys.start).await?;
        let mut batch = WriteBatch::new();

        self.rotated = existing
            .as_deref()
            .is_none_or(|start| start < self.hour_start.as_str());
        if self.rotated {
            // RENAME fails on a missing source, so only move what exists.
            if txn.zcard(&keys.bucket).await? > 0 {
                batch.push(Op::Rename {
                    from: keys.bucket.clone(),
                    to: keys.last.clone(),
                });
            }
            if existing.is_some() {
                batch.push(Op::Rename {
                    from: keys.start.clone(),
                    to: keys.pstart.clone(),
                });
            }
            batch.push(Op::Set {
                key: keys.start.clone(),
                value: self.hour_start.clone(),
            });
        }

        self.incr_index = batch.len();
        batch.push(Op::ZIncrBy {
            key: keys.bucket.clone(),
            member: self.message.clone(),
            delta: 1.0,
        });
        for op in push_recent(&keys.recent, self.entry.clone()) {
            batch.push(op);
        }
        Ok(Plan::Commit(batch))
    }

    fn finish(self, replies: Vec<Reply>) -> Result<Recorded, StoreError> {
        let count = replies
            .get(self.incr_index)
            .and_then(Reply::as_float)
            .ok_or_else(|| StoreError::UnexpectedReply("missing ZINCRBY reply".to_owned()))?;
        Ok(Recorded {
            rotated: self.rotated,
            hour_start: self.hour_start,
            count,
        })
    }
}
