//! Store-agnostic command model.
//!
//! Transaction bodies never talk to a backend's client API directly. They
//! issue [`Read`]s through a [`KeyReader`] and describe their writes as a
//! [`WriteBatch`] of [`Op`]s. Every op produces exactly one [`Reply`], in
//! batch order, once the batch has been applied.
//!
//! [`KeyReader`]: crate::KeyReader

/// A single write (or queued read) inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// `SET key value`. Replies [`Reply::Ok`].
    Set {
        /// Target key.
        key: String,
        /// New scalar value.
        value: String,
    },
    /// `DEL key...`. Replies the number of keys removed.
    Del {
        /// Keys to delete.
        keys: Vec<String>,
    },
    /// `RENAME from to`. Fails if `from` does not exist. Replies [`Reply::Ok`].
    Rename {
        /// Source key.
        from: String,
        /// Destination key (overwritten).
        to: String,
    },
    /// `EXPIRE key seconds`. Replies 1 if the key exists, else 0. A zero
    /// timeout deletes the key at once.
    Expire {
        /// Target key.
        key: String,
        /// Time to live.
        seconds: u64,
    },
    /// `HSET key field value`. Replies the number of new fields.
    HSet {
        /// Hash key.
        key: String,
        /// Field name.
        field: String,
        /// Field value.
        value: String,
    },
    /// `HINCRBY key field delta`. Replies the new field value.
    HIncrBy {
        /// Hash key.
        key: String,
        /// Field name.
        field: String,
        /// Signed increment.
        delta: i64,
    },
    /// `HDEL key field...`. Replies the number of fields removed.
    HDel {
        /// Hash key.
        key: String,
        /// Fields to remove.
        fields: Vec<String>,
    },
    /// `SADD key member`. Replies the number of members added.
    SAdd {
        /// Set key.
        key: String,
        /// Member to add.
        member: String,
    },
    /// `SREM key member`. Replies the number of members removed.
    SRem {
        /// Set key.
        key: String,
        /// Member to remove.
        member: String,
    },
    /// `ZADD key score member`. Replies the number of new members.
    ZAdd {
        /// Sorted-set key.
        key: String,
        /// Member name.
        member: String,
        /// Member score.
        score: f64,
    },
    /// `ZINCRBY key delta member`. Replies the new score.
    ZIncrBy {
        /// Sorted-set key.
        key: String,
        /// Member name.
        member: String,
        /// Score increment.
        delta: f64,
    },
    /// `ZREM key member...`. Replies the number of members removed.
    ZRem {
        /// Sorted-set key.
        key: String,
        /// Members to remove.
        members: Vec<String>,
    },
    /// `ZREMRANGEBYRANK key start stop`. Replies the number of members
    /// removed.
    ZRemRangeByRank {
        /// Sorted-set key.
        key: String,
        /// First rank removed (negative counts from the end).
        start: i64,
        /// Last rank removed, inclusive (negative counts from the end).
        stop: i64,
    },
    /// `ZRANGE key start stop`, queued inside the batch so it observes the
    /// batch's own earlier writes. Replies [`Reply::Members`].
    ZRange {
        /// Sorted-set key.
        key: String,
        /// First rank (negative counts from the end).
        start: i64,
        /// Last rank, inclusive (negative counts from the end).
        stop: i64,
    },
    /// `LPUSH key value`. Replies the new list length.
    LPush {
        /// List key.
        key: String,
        /// Value pushed to the head.
        value: String,
    },
    /// `LTRIM key start stop`. Replies [`Reply::Ok`].
    LTrim {
        /// List key.
        key: String,
        /// First index kept.
        start: i64,
        /// Last index kept, inclusive.
        stop: i64,
    },
}

impl Op {
    /// The key this op writes or reads, used for logging.
    pub fn key(&self) -> &str {
        match self {
            Self::Del { keys } => keys.first().map_or("", String::as_str),
            Self::Rename { from, .. } => from,
            Self::Set { key, .. }
            | Self::Expire { key, .. }
            | Self::HSet { key, .. }
            | Self::HIncrBy { key, .. }
            | Self::HDel { key, .. }
            | Self::SAdd { key, .. }
            | Self::SRem { key, .. }
            | Self::ZAdd { key, .. }
            | Self::ZIncrBy { key, .. }
            | Self::ZRem { key, .. }
            | Self::ZRemRangeByRank { key, .. }
            | Self::ZRange { key, .. }
            | Self::LPush { key, .. }
            | Self::LTrim { key, .. } => key,
        }
    }
}

/// The reply to a single [`Op`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Status reply (`OK`).
    Ok,
    /// Integer reply.
    Int(i64),
    /// Floating-point reply (sorted-set scores).
    Float(f64),
    /// Member list reply.
    Members(Vec<String>),
}

impl Reply {
    /// Return the integer payload, if this is an integer reply.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Return the score payload, if this is a float reply.
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(score) => Some(*score),
            _ => None,
        }
    }

    /// Take the member list, if this is a members reply.
    pub fn into_members(self) -> Option<Vec<String>> {
        match self {
            Self::Members(members) => Some(members),
            _ => None,
        }
    }
}

/// An ordered sequence of ops applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<Op>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Append an op, builder style.
    #[must_use]
    pub fn with(mut self, op: Op) -> Self {
        self.ops.push(op);
        self
    }

    /// Append an op.
    pub fn push(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// The ops in application order.
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Number of ops in the batch.
    pub const fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch has no ops.
    pub const fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl From<Vec<Op>> for WriteBatch {
    fn from(ops: Vec<Op>) -> Self {
        Self { ops }
    }
}

impl IntoIterator for WriteBatch {
    type Item = Op;
    type IntoIter = std::vec::IntoIter<Op>;

    fn into_iter(self) -> Self::IntoIter {
        self.ops.into_iter()
    }
}

/// Result of a conditional commit.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Every op was applied; one reply per op, in batch order.
    Committed(Vec<Reply>),
    /// A watched key changed since the watch; nothing was applied.
    Conflict,
}

/// A plain read. Safe to issue while a watch is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Read {
    /// `GET key`.
    Get {
        /// Scalar key.
        key: String,
    },
    /// `EXISTS key`.
    Exists {
        /// Any key.
        key: String,
    },
    /// `HGET key field`.
    HGet {
        /// Hash key.
        key: String,
        /// Field name.
        field: String,
    },
    /// `SISMEMBER key member`.
    SIsMember {
        /// Set key.
        key: String,
        /// Member to test.
        member: String,
    },
    /// `SMEMBERS key`.
    SMembers {
        /// Set key.
        key: String,
    },
    /// `ZSCORE key member`.
    ZScore {
        /// Sorted-set key.
        key: String,
        /// Member name.
        member: String,
    },
    /// `ZRANK key member`.
    ZRank {
        /// Sorted-set key.
        key: String,
        /// Member name.
        member: String,
    },
    /// `ZRANGE key start stop`.
    ZRange {
        /// Sorted-set key.
        key: String,
        /// First rank.
        start: i64,
        /// Last rank, inclusive.
        stop: i64,
    },
    /// `ZRANGE key start stop WITHSCORES`.
    ZRangeWithScores {
        /// Sorted-set key.
        key: String,
        /// First rank.
        start: i64,
        /// Last rank, inclusive.
        stop: i64,
    },
    /// `ZCARD key`.
    ZCard {
        /// Sorted-set key.
        key: String,
    },
    /// `LRANGE key start stop`.
    LRange {
        /// List key.
        key: String,
        /// First index.
        start: i64,
        /// Last index, inclusive.
        stop: i64,
    },
}

/// The reply to a single [`Read`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReadReply {
    /// A scalar or hash field value, absent if missing.
    Value(Option<String>),
    /// A boolean test result.
    Bool(bool),
    /// A member or element list.
    Members(Vec<String>),
    /// A sorted-set score, absent if the member is missing.
    Score(Option<f64>),
    /// A sorted-set rank, absent if the member is missing.
    Rank(Option<u64>),
    /// Members paired with their scores, in rank order.
    Scored(Vec<(String, f64)>),
    /// A cardinality.
    Count(u64),
}

/// Resolve Redis-style `start`/`stop` indices (inclusive, negative counting
/// from the end) against a collection of `len` items.
///
/// Returns the half-open index range to take, or `None` if it is empty.
pub fn resolve_range(len: usize, start: i64, stop: i64) -> Option<std::ops::Range<usize>> {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let normalize = |index: i64| {
        if index < 0 {
            len_i.saturating_add(index)
        } else {
            index
        }
    };
    let first = normalize(start).max(0);
    let last = normalize(stop).min(len_i.saturating_sub(1));
    if len == 0 || first > last {
        return None;
    }
    let first = usize::try_from(first).ok()?;
    let end = usize::try_from(last.saturating_add(1)).ok()?;
    Some(first..end)
}
