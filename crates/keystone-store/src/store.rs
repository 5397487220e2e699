//! The versioned store contract consumed by the transaction coordinator.
//!
//! A [`VersionedStore`] supports scalar, hash, set, sorted-set and list
//! values, each individually watchable for modification. The protocol is
//! optimistic: [`watch`](VersionedStore::watch) marks keys, reads go through
//! the returned handle without taking locks, and
//! [`commit`](VersionedStore::commit) applies a batch only if no watched key
//! changed in between.

use std::future::Future;

use crate::command::{CommitOutcome, Read, ReadReply, Reply, WriteBatch};
use crate::error::StoreError;

/// Plain reads against a store or a watched transaction handle.
///
/// Backends implement [`read`](Self::read); the typed helpers are provided.
pub trait KeyReader: Send + Sync {
    /// Execute a single read.
    fn read(&self, read: Read) -> impl Future<Output = Result<ReadReply, StoreError>> + Send;

    /// `GET key`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send {
        let read = Read::Get {
            key: key.to_owned(),
        };
        async move {
            match self.read(read).await? {
                ReadReply::Value(value) => Ok(value),
                other => Err(unexpected("GET", &other)),
            }
        }
    }

    /// `EXISTS key`.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send {
        let read = Read::Exists {
            key: key.to_owned(),
        };
        async move {
            match self.read(read).await? {
                ReadReply::Bool(found) => Ok(found),
                other => Err(unexpected("EXISTS", &other)),
            }
        }
    }

    /// `HGET key field`.
    fn hget(
        &self,
        key: &str,
        field: &str,
    ) -> impl Future<Output = Result<Option<String>, StoreError>> + Send {
        let read = Read::HGet {
            key: key.to_owned(),
            field: field.to_owned(),
        };
        async move {
            match self.read(read).await? {
                ReadReply::Value(value) => Ok(value),
                other => Err(unexpected("HGET", &other)),
            }
        }
    }

    /// `SISMEMBER key member`.
    fn sismember(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send {
        let read = Read::SIsMember {
            key: key.to_owned(),
            member: member.to_owned(),
        };
        async move {
            match self.read(read).await? {
                ReadReply::Bool(found) => Ok(found),
                other => Err(unexpected("SISMEMBER", &other)),
            }
        }
    }

    /// `SMEMBERS key`, sorted for stable output.
    fn smembers(&self, key: &str) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send {
        let read = Read::SMembers {
            key: key.to_owned(),
        };
        async move {
            match self.read(read).await? {
                ReadReply::Members(mut members) => {
                    members.sort_unstable();
                    Ok(members)
                }
                other => Err(unexpected("SMEMBERS", &other)),
            }
        }
    }

    /// `ZSCORE key member`.
    fn zscore(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<Option<f64>, StoreError>> + Send {
        let read = Read::ZScore {
            key: key.to_owned(),
            member: member.to_owned(),
        };
        async move {
            match self.read(read).await? {
                ReadReply::Score(score) => Ok(score),
                other => Err(unexpected("ZSCORE", &other)),
            }
        }
    }

    /// `ZRANK key member`.
    fn zrank(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<Option<u64>, StoreError>> + Send {
        let read = Read::ZRank {
            key: key.to_owned(),
            member: member.to_owned(),
        };
        async move {
            match self.read(read).await? {
                ReadReply::Rank(rank) => Ok(rank),
                other => Err(unexpected("ZRANK", &other)),
            }
        }
    }

    /// `ZRANGE key start stop`.
    fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send {
        let read = Read::ZRange {
            key: key.to_owned(),
            start,
            stop,
        };
        async move {
            match self.read(read).await? {
                ReadReply::Members(members) => Ok(members),
                other => Err(unexpected("ZRANGE", &other)),
            }
        }
    }

    /// `ZRANGE key start stop WITHSCORES`.
    fn zrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> impl Future<Output = Result<Vec<(String, f64)>, StoreError>> + Send {
        let read = Read::ZRangeWithScores {
            key: key.to_owned(),
            start,
            stop,
        };
        async move {
            match self.read(read).await? {
                ReadReply::Scored(entries) => Ok(entries),
                other => Err(unexpected("ZRANGE WITHSCORES", &other)),
            }
        }
    }

    /// `ZCARD key`.
    fn zcard(&self, key: &str) -> impl Future<Output = Result<u64, StoreError>> + Send {
        let read = Read::ZCard {
            key: key.to_owned(),
        };
        async move {
            match self.read(read).await? {
                ReadReply::Count(count) => Ok(count),
                other => Err(unexpected("ZCARD", &other)),
            }
        }
    }

    /// `LRANGE key start stop`.
    fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send {
        let read = Read::LRange {
            key: key.to_owned(),
            start,
            stop,
        };
        async move {
            match self.read(read).await? {
                ReadReply::Members(items) => Ok(items),
                other => Err(unexpected("LRANGE", &other)),
            }
        }
    }
}

/// A key-value store with per-key change detection and conditional commit.
///
/// Implementations must guarantee:
/// - `commit` applies every op of the batch or none of them.
/// - `commit` reports [`CommitOutcome::Conflict`] if any watched key was
///   modified by another committer since `watch`, and then applies nothing.
/// - Reads never block on an outstanding watch.
pub trait VersionedStore: KeyReader + 'static {
    /// A watch handle scoped to one transaction attempt. Reads issued
    /// through it see the store's current state.
    type Txn: KeyReader;

    /// Begin tracking `keys` for modification.
    fn watch(&self, keys: &[String]) -> impl Future<Output = Result<Self::Txn, StoreError>> + Send;

    /// Apply `batch` iff no watched key changed since the watch.
    fn commit(
        &self,
        txn: Self::Txn,
        batch: WriteBatch,
    ) -> impl Future<Output = Result<CommitOutcome, StoreError>> + Send;

    /// Release a watch without committing.
    fn unwatch(&self, txn: Self::Txn) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Apply `batch` atomically without any watch condition.
    fn apply(&self, batch: WriteBatch) -> impl Future<Output = Result<Vec<Reply>, StoreError>> + Send;
}

fn unexpected(command: &str, reply: &ReadReply) -> StoreError {
    StoreError::UnexpectedReply(format!("{command} returned {reply:?}"))
}
