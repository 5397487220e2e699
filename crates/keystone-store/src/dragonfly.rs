//! `Dragonfly` (Redis-compatible) backend.
//!
//! Plain reads and unconditional batches go through one shared multiplexed
//! [`Client`]. `WATCH` state is per connection, so every in-flight
//! transaction checks out a dedicated connection from a small idle pool and
//! returns it after `EXEC` or `UNWATCH`. A connection whose command failed
//! is closed instead, since its `WATCH` state is unknown. A semaphore caps
//! the number of watch connections open at once.
//!
//! # Command Mapping
//!
//! | [`Op`] / [`Read`] | Command |
//! |-------------------|---------|
//! | `Set` / `Get` | `SET` / `GET` |
//! | `HSet`, `HIncrBy`, `HDel` / `HGet` | `HSET`, `HINCRBY`, `HDEL` / `HGET` |
//! | `SAdd`, `SRem` / `SIsMember`, `SMembers` | `SADD`, `SREM` / `SISMEMBER`, `SMEMBERS` |
//! | `ZAdd`, `ZIncrBy`, `ZRem`, `ZRemRangeByRank`, `ZRange` / `ZScore`, `ZRank`, `ZCard` | `ZADD`, `ZINCRBY`, `ZREM`, `ZREMRANGEBYRANK`, `ZRANGE` / `ZSCORE`, `ZRANK`, `ZCARD` |
//! | `LPush`, `LTrim` / `LRange` | `LPUSH`, `LTRIM` / `LRANGE` |
//! | `Rename`, `Del`, `Expire` / `Exists` | `RENAME`, `DEL`, `EXPIRE` / `EXISTS` |

use std::sync::Arc;

use fred::clients::Transaction;
use fred::prelude::*;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use crate::command::{CommitOutcome, Op, Read, ReadReply, Reply, WriteBatch};
use crate::error::StoreError;
use crate::store::{KeyReader, VersionedStore};

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
#[derive(Clone)]
pub struct DragonflyStore {
    client: Client,
    idle: Arc<Mutex<Vec<Client>>>,
    permits: Arc<Semaphore>,
}

impl DragonflyStore {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`. At most
    /// `watch_pool_size` dedicated watch connections are open at once; a
    /// further `watch` waits for one to be released.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the URL cannot be parsed or the pool
    /// size is zero.
    /// Returns [`StoreError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str, watch_pool_size: usize) -> Result<Self, StoreError> {
        if watch_pool_size == 0 {
            return Err(StoreError::Config(
                "watch pool size must be at least 1".to_owned(),
            ));
        }
        let config = Config::from_url(url)
            .map_err(|e| StoreError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!(watch_pool_size, "Connected to Dragonfly");
        Ok(Self {
            client,
            idle: Arc::new(Mutex::new(Vec::with_capacity(watch_pool_size))),
            permits: Arc::new(Semaphore::new(watch_pool_size)),
        })
    }

    /// Return a reference to the shared [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }

    /// Flush all keys from the `Dragonfly` instance.
    ///
    /// **WARNING:** This deletes all data. Only use for testing.
    pub async fn flush_all(&self) -> Result<(), StoreError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }

    /// Take a watch connection, opening one if none is idle.
    async fn checkout(&self) -> Result<DragonflyTxn, StoreError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::WatchPoolClosed)?;
        let idle = self.idle.lock().await.pop();
        let conn = match idle {
            Some(conn) => conn,
            None => {
                let conn = self.client.clone_new();
                conn.init().await?;
                tracing::debug!("Opened dedicated watch connection");
                conn
            }
        };
        Ok(DragonflyTxn {
            conn,
            _permit: permit,
        })
    }

    /// Return a connection with no outstanding `WATCH` to the idle list.
    async fn checkin(&self, txn: DragonflyTxn) {
        let DragonflyTxn { conn, _permit } = txn;
        self.idle.lock().await.push(conn);
    }

    /// Close a connection whose `WATCH` state is unknown after a failure.
    async fn discard(&self, txn: DragonflyTxn, error: &StoreError) {
        tracing::debug!(error = %error, "closing watch connection after failure");
        if let Err(e) = txn.conn.quit().await {
            tracing::debug!(error = %e, "failed to close watch connection");
        }
    }
}

/// Watch handle for [`DragonflyStore`]: a dedicated connection with an
/// outstanding `WATCH`, holding one slot of the pool.
pub struct DragonflyTxn {
    conn: Client,
    _permit: OwnedSemaphorePermit,
}

impl KeyReader for DragonflyStore {
    async fn read(&self, read: Read) -> Result<ReadReply, StoreError> {
        execute_read(&self.client, read).await
    }
}

impl KeyReader for DragonflyTxn {
    async fn read(&self, read: Read) -> Result<ReadReply, StoreError> {
        execute_read(&self.conn, read).await
    }
}

impl VersionedStore for DragonflyStore {
    type Txn = DragonflyTxn;

    async fn watch(&self, keys: &[String]) -> Result<DragonflyTxn, StoreError> {
        let txn = self.checkout().await?;
        let watched: Result<(), fred::error::Error> = txn.conn.watch(keys.to_vec()).await;
        if let Err(e) = watched {
            let error = StoreError::from(e);
            self.discard(txn, &error).await;
            return Err(error);
        }
        Ok(txn)
    }

    async fn commit(
        &self,
        txn: DragonflyTxn,
        batch: WriteBatch,
    ) -> Result<CommitOutcome, StoreError> {
        let result = match exec(&txn.conn, batch.ops()).await {
            Ok(result) => result,
            Err(e) => {
                self.discard(txn, &e).await;
                return Err(e);
            }
        };
        // EXEC clears the watch whether or not it ran the batch.
        self.checkin(txn).await;
        // A nil EXEC reply means a watched key changed and nothing ran.
        if result.is_null() {
            return Ok(CommitOutcome::Conflict);
        }
        let replies = convert_replies(batch.ops(), result)?;
        Ok(CommitOutcome::Committed(replies))
    }

    async fn unwatch(&self, txn: DragonflyTxn) -> Result<(), StoreError> {
        let released: Result<(), fred::error::Error> = txn.conn.unwatch().await;
        match released {
            Ok(()) => {
                self.checkin(txn).await;
                Ok(())
            }
            Err(e) => {
                let error = StoreError::from(e);
                self.discard(txn, &error).await;
                Err(error)
            }
        }
    }

    async fn apply(&self, batch: WriteBatch) -> Result<Vec<Reply>, StoreError> {
        let result = exec(&self.client, batch.ops()).await?;
        convert_replies(batch.ops(), result)
    }
}

/// Queue `ops` inside `MULTI` on `client` and run them.
async fn exec(client: &Client, ops: &[Op]) -> Result<Value, StoreError> {
    let trx = client.multi();
    for op in ops {
        queue(&trx, op).await?;
    }
    Ok(trx.exec(true).await?)
}

async fn execute_read(client: &Client, read: Read) -> Result<ReadReply, StoreError> {
    let reply = match read {
        Read::Get { key } => ReadReply::Value(client.get(key.as_str()).await?),
        Read::Exists { key } => {
            let found: i64 = client.exists(key.as_str()).await?;
            ReadReply::Bool(found > 0)
        }
        Read::HGet { key, field } => {
            ReadReply::Value(client.hget(key.as_str(), field.as_str()).await?)
        }
        Read::SIsMember { key, member } => {
            ReadReply::Bool(client.sismember(key.as_str(), member.as_str()).await?)
        }
        Read::SMembers { key } => ReadReply::Members(client.smembers(key.as_str()).await?),
        Read::ZScore { key, member } => {
            ReadReply::Score(client.zscore(key.as_str(), member.as_str()).await?)
        }
        Read::ZRank { key, member } => {
            let rank: Option<i64> = client.zrank(key.as_str(), member.as_str(), false).await?;
            ReadReply::Rank(rank.and_then(|r| u64::try_from(r).ok()))
        }
        Read::ZRange { key, start, stop } => ReadReply::Members(
            client
                .zrange(key.as_str(), start, stop, None, false, None, false)
                .await?,
        ),
        Read::ZRangeWithScores { key, start, stop } => ReadReply::Scored(
            client
                .zrange(key.as_str(), start, stop, None, false, None, true)
                .await?,
        ),
        Read::ZCard { key } => ReadReply::Count(client.zcard(key.as_str()).await?),
        Read::LRange { key, start, stop } => {
            ReadReply::Members(client.lrange(key.as_str(), start, stop).await?)
        }
    };
    Ok(reply)
}

async fn queue(trx: &Transaction, op: &Op) -> Result<(), StoreError> {
    match op {
        Op::Set { key, value } => {
            let _: () = trx
                .set(key.as_str(), value.as_str(), None, None, false)
                .await?;
        }
        Op::Del { keys } => {
            let _: () = trx.del(keys.clone()).await?;
        }
        Op::Rename { from, to } => {
            let _: () = trx.rename(from.as_str(), to.as_str()).await?;
        }
        Op::Expire { key, seconds } => {
            let seconds = i64::try_from(*seconds).unwrap_or(i64::MAX);
            let _: () = trx.expire(key.as_str(), seconds, None).await?;
        }
        Op::HSet { key, field, value } => {
            let _: () = trx
                .hset(key.as_str(), (field.as_str(), value.as_str()))
                .await?;
        }
        Op::HIncrBy { key, field, delta } => {
            let _: () = trx.hincrby(key.as_str(), field.as_str(), *delta).await?;
        }
        Op::HDel { key, fields } => {
            let _: () = trx.hdel(key.as_str(), fields.clone()).await?;
        }
        Op::SAdd { key, member } => {
            let _: () = trx.sadd(key.as_str(), member.as_str()).await?;
        }
        Op::SRem { key, member } => {
            let _: () = trx.srem(key.as_str(), member.as_str()).await?;
        }
        Op::ZAdd { key, member, score } => {
            let _: () = trx
                .zadd(key.as_str(), None, None, false, false, (*score, member.as_str()))
                .await?;
        }
        Op::ZIncrBy { key, member, delta } => {
            let _: () = trx.zincrby(key.as_str(), *delta, member.as_str()).await?;
        }
        Op::ZRem { key, members } => {
            let _: () = trx.zrem(key.as_str(), members.clone()).await?;
        }
        Op::ZRemRangeByRank { key, start, stop } => {
            let _: () = trx.zremrangebyrank(key.as_str(), *start, *stop).await?;
        }
        Op::ZRange { key, start, stop } => {
            let _: () = trx
                .zrange(key.as_str(), *start, *stop, None, false, None, false)
                .await?;
        }
        Op::LPush { key, value } => {
            let _: () = trx.lpush(key.as_str(), value.as_str()).await?;
        }
        Op::LTrim { key, start, stop } => {
            let _: () = trx.ltrim(key.as_str(), *start, *stop).await?;
        }
    }
    Ok(())
}

fn convert_replies(ops: &[Op], result: Value) -> Result<Vec<Reply>, StoreError> {
    let values = result.into_array();
    if values.len() != ops.len() {
        return Err(StoreError::UnexpectedReply(format!(
            "EXEC returned {} replies for {} commands",
            values.len(),
            ops.len()
        )));
    }
    ops.iter()
        .zip(values)
        .map(|(op, value)| convert_reply(op, value))
        .collect()
}

fn convert_reply(op: &Op, value: Value) -> Result<Reply, StoreError> {
    let reply = match op {
        Op::Set { .. } | Op::Rename { .. } | Op::LTrim { .. } => Reply::Ok,
        Op::ZIncrBy { .. } => Reply::Float(value.convert::<f64>()?),
        Op::ZRange { .. } => Reply::Members(value.convert::<Vec<String>>()?),
        Op::Del { .. }
        | Op::Expire { .. }
        | Op::HSet { .. }
        | Op::HIncrBy { .. }
        | Op::HDel { .. }
        | Op::SAdd { .. }
        | Op::SRem { .. }
        | Op::ZAdd { .. }
        | Op::ZRem { .. }
        | Op::ZRemRangeByRank { .. }
        | Op::LPush { .. } => Reply::Int(value.convert::<i64>()?),
    };
    Ok(reply)
}
