//! In-process versioned keyspace.
//!
//! [`MemoryStore`] implements the full [`VersionedStore`] contract without a
//! server. Every key carries a version drawn from one global counter; any
//! modifying write (deletion included) assigns the key a fresh version. A
//! watch records the versions it saw, and a commit re-checks them under the
//! write lock before applying the batch. A batch whose op fails is rolled
//! back, so no earlier op of it stays applied.
//!
//! Value semantics follow Redis: empty collections disappear, sorted sets
//! order by `(score, member)`, and operating on a key of another type fails
//! with [`StoreError::WrongType`]. Expired keys read as absent and are
//! removed, with a version bump, by the next write.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::command::{CommitOutcome, Op, Read, ReadReply, Reply, WriteBatch, resolve_range};
use crate::error::StoreError;
use crate::store::{KeyReader, VersionedStore};

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Total order over sorted-set scores.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// A sorted set: member lookup plus `(score, member)` ordering.
#[derive(Debug, Clone, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    order: BTreeSet<(Score, String)>,
}

impl SortedSet {
    /// Insert or update a member. Returns `true` if the member is new.
    fn insert(&mut self, member: &str, score: f64) -> bool {
        let previous = self.scores.insert(member.to_owned(), score);
        if let Some(old) = previous {
            self.order.remove(&(Score(old), member.to_owned()));
        }
        self.order.insert((Score(score), member.to_owned()));
        previous.is_none()
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(old) => {
                self.order.remove(&(Score(old), member.to_owned()));
                true
            }
            None => false,
        }
    }

    fn score(&self, member: &str) -> Option<f64> {
        self.scores.get(member).copied()
    }

    fn rank(&self, member: &str) -> Option<u64> {
        let score = self.score(member)?;
        let position = self
            .order
            .iter()
            .position(|(s, m)| *s == Score(score) && m == member)?;
        u64::try_from(position).ok()
    }

    fn range(&self, start: i64, stop: i64) -> Vec<(String, f64)> {
        resolve_range(self.order.len(), start, stop).map_or_else(Vec::new, |range| {
            self.order
                .iter()
                .skip(range.start)
                .take(range.len())
                .map(|(score, member)| (member.clone(), score.0))
                .collect()
        })
    }

    fn len(&self) -> usize {
        self.scores.len()
    }

    fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// A stored value.
#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    ZSet(SortedSet),
    List(VecDeque<String>),
}

impl Value {
    fn is_empty_collection(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::Hash(map) => map.is_empty(),
            Self::Set(set) => set.is_empty(),
            Self::ZSet(zset) => zset.is_empty(),
            Self::List(list) => list.is_empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// Keyspace
// ---------------------------------------------------------------------------

/// All keys, their values, and their versions.
#[derive(Debug, Default)]
struct Keyspace {
    data: HashMap<String, Value>,
    /// Version of every key ever written. Survives deletion.
    versions: HashMap<String, u64>,
    /// Deadlines set by `EXPIRE`.
    expiry: HashMap<String, Instant>,
    clock: u64,
}

/// Generate a typed accessor that returns the collection stored at `key`,
/// or `None` if the key is absent.
macro_rules! typed_get {
    ($name:ident, $variant:ident, $ty:ty, $label:literal) => {
        fn $name(&self, key: &str) -> Result<Option<&$ty>, StoreError> {
            match self.live(key) {
                None => Ok(None),
                Some(Value::$variant(inner)) => Ok(Some(inner)),
                Some(_) => Err(wrong_type(key, $label)),
            }
        }
    };
}

/// Generate a typed accessor that returns the collection stored at `key`,
/// creating an empty one if absent.
macro_rules! typed_entry {
    ($name:ident, $variant:ident, $ty:ty, $label:literal) => {
        fn $name(&mut self, key: &str) -> Result<&mut $ty, StoreError> {
            let value = self
                .data
                .entry(key.to_owned())
                .or_insert_with(|| Value::$variant(<$ty>::default()));
            match value {
                Value::$variant(inner) => Ok(inner),
                _ => Err(wrong_type(key, $label)),
            }
        }
    };
}

impl Keyspace {
    typed_get!(hash, Hash, HashMap<String, String>, "hash");
    typed_get!(set, Set, HashSet<String>, "set");
    typed_get!(zset, ZSet, SortedSet, "zset");
    typed_get!(list, List, VecDeque<String>, "list");

    typed_entry!(hash_mut, Hash, HashMap<String, String>, "hash");
    typed_entry!(set_mut, Set, HashSet<String>, "set");
    typed_entry!(zset_mut, ZSet, SortedSet, "zset");
    typed_entry!(list_mut, List, VecDeque<String>, "list");

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    /// The value at `key` unless it has expired.
    fn live(&self, key: &str) -> Option<&Value> {
        let expired = self
            .expiry
            .get(key)
            .is_some_and(|deadline| *deadline <= Instant::now());
        if expired { None } else { self.data.get(key) }
    }

    /// Remove every key whose deadline has passed.
    fn purge_expired(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .expiry
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in due {
            self.expiry.remove(&key);
            if self.data.remove(&key).is_some() {
                self.touch(&key);
            }
        }
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        self.expiry.remove(key);
        self.data.remove(key)
    }

    fn touch(&mut self, key: &str) {
        self.clock = self.clock.saturating_add(1);
        self.versions.insert(key.to_owned(), self.clock);
    }

    /// Drop `key` if it holds an empty collection.
    fn prune(&mut self, key: &str) {
        if self.data.get(key).is_some_and(Value::is_empty_collection) {
            self.remove(key);
        }
    }

    fn read(&self, read: &Read) -> Result<ReadReply, StoreError> {
        let reply = match read {
            Read::Get { key } => match self.live(key) {
                None => ReadReply::Value(None),
                Some(Value::Str(value)) => ReadReply::Value(Some(value.clone())),
                Some(_) => return Err(wrong_type(key, "string")),
            },
            Read::Exists { key } => ReadReply::Bool(self.live(key).is_some()),
            Read::HGet { key, field } => {
                ReadReply::Value(self.hash(key)?.and_then(|h| h.get(field).cloned()))
            }
            Read::SIsMember { key, member } => {
                ReadReply::Bool(self.set(key)?.is_some_and(|s| s.contains(member)))
            }
            Read::SMembers { key } => ReadReply::Members(
                self.set(key)?
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default(),
            ),
            Read::ZScore { key, member } => {
                ReadReply::Score(self.zset(key)?.and_then(|z| z.score(member)))
            }
            Read::ZRank { key, member } => {
                ReadReply::Rank(self.zset(key)?.and_then(|z| z.rank(member)))
            }
            Read::ZRange { key, start, stop } => ReadReply::Members(
                self.zset(key)?
                    .map(|z| z.range(*start, *stop).into_iter().map(|(m, _)| m).collect())
                    .unwrap_or_default(),
            ),
            Read::ZRangeWithScores { key, start, stop } => ReadReply::Scored(
                self.zset(key)?
                    .map(|z| z.range(*start, *stop))
                    .unwrap_or_default(),
            ),
            Read::ZCard { key } => ReadReply::Count(
                self.zset(key)?
                    .map_or(0, |z| u64::try_from(z.len()).unwrap_or(u64::MAX)),
            ),
            Read::LRange { key, start, stop } => {
                let items = self.list(key)?.map_or_else(Vec::new, |list| {
                    resolve_range(list.len(), *start, *stop).map_or_else(Vec::new, |range| {
                        list.iter()
                            .skip(range.start)
                            .take(range.len())
                            .cloned()
                            .collect()
                    })
                });
                ReadReply::Members(items)
            }
        };
        Ok(reply)
    }

    /// Record the current state of every key `batch` may write.
    fn snapshot(&self, batch: &WriteBatch) -> Undo {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for key in batch.ops().iter().flat_map(written_keys) {
            if seen.insert(key) {
                entries.push(KeyState {
                    key: key.to_owned(),
                    value: self.data.get(key).cloned(),
                    version: self.versions.get(key).copied(),
                    deadline: self.expiry.get(key).copied(),
                });
            }
        }
        Undo {
            clock: self.clock,
            entries,
        }
    }

    /// Put every key recorded in `undo` back the way it was.
    fn rollback(&mut self, undo: Undo) {
        self.clock = undo.clock;
        for state in undo.entries {
            restore(&mut self.data, &state.key, state.value);
            restore(&mut self.versions, &state.key, state.version);
            restore(&mut self.expiry, &state.key, state.deadline);
        }
    }

    #[allow(clippy::too_many_lines)]
    fn apply_op(&mut self, op: Op) -> Result<Reply, StoreError> {
        let reply = match op {
            Op::Set { key, value } => {
                self.expiry.remove(&key);
                self.data.insert(key.clone(), Value::Str(value));
                self.touch(&key);
                Reply::Ok
            }
            Op::Del { keys } => {
                let mut removed: i64 = 0;
                for key in keys {
                    if self.remove(&key).is_some() {
                        self.touch(&key);
                        removed = removed.saturating_add(1);
                    }
                }
                Reply::Int(removed)
            }
            Op::Rename { from, to } => {
                let deadline = self.expiry.remove(&from);
                let value = self
                    .data
                    .remove(&from)
                    .ok_or_else(|| StoreError::NoSuchKey(from.clone()))?;
                self.remove(&to);
                self.data.insert(to.clone(), value);
                if let Some(deadline) = deadline {
                    self.expiry.insert(to.clone(), deadline);
                }
                self.touch(&from);
                self.touch(&to);
                Reply::Ok
            }
            Op::Expire { key, seconds } => {
                if self.data.contains_key(&key) {
                    if seconds == 0 {
                        self.remove(&key);
                    } else if let Some(deadline) =
                        Instant::now().checked_add(Duration::from_secs(seconds))
                    {
                        self.expiry.insert(key.clone(), deadline);
                    }
                    self.touch(&key);
                    Reply::Int(1)
                } else {
                    Reply::Int(0)
                }
            }
            Op::HSet { key, field, value } => {
                let added = self.hash_mut(&key)?.insert(field, value).is_none();
                self.touch(&key);
                Reply::Int(i64::from(added))
            }
            Op::HIncrBy { key, field, delta } => {
                let hash = self.hash_mut(&key)?;
                let current = match hash.get(&field) {
                    Some(raw) => parse_int(&key, raw)?,
                    None => 0,
                };
                let next = current.checked_add(delta).ok_or_else(|| StoreError::Malformed {
                    key: key.clone(),
                    detail: format!("increment by {delta} overflows {current}"),
                })?;
                hash.insert(field, next.to_string());
                self.touch(&key);
                Reply::Int(next)
            }
            Op::HDel { key, fields } => {
                let mut removed: i64 = 0;
                if self.hash(&key)?.is_some() {
                    let hash = self.hash_mut(&key)?;
                    for field in &fields {
                        if hash.remove(field).is_some() {
                            removed = removed.saturating_add(1);
                        }
                    }
                }
                if removed > 0 {
                    self.touch(&key);
                }
                self.prune(&key);
                Reply::Int(removed)
            }
            Op::SAdd { key, member } => {
                let added = self.set_mut(&key)?.insert(member);
                if added {
                    self.touch(&key);
                }
                Reply::Int(i64::from(added))
            }
            Op::SRem { key, member } => {
                let removed = self.set(&key)?.is_some() && self.set_mut(&key)?.remove(&member);
                if removed {
                    self.touch(&key);
                }
                self.prune(&key);
                Reply::Int(i64::from(removed))
            }
            Op::ZAdd { key, member, score } => {
                let zset = self.zset_mut(&key)?;
                let unchanged = zset.score(&member).is_some_and(|s| Score(s) == Score(score));
                let added = zset.insert(&member, score);
                if !unchanged {
                    self.touch(&key);
                }
                Reply::Int(i64::from(added))
            }
            Op::ZIncrBy { key, member, delta } => {
                let zset = self.zset_mut(&key)?;
                let next = zset.score(&member).unwrap_or(0.0) + delta;
                zset.insert(&member, next);
                self.touch(&key);
                Reply::Float(next)
            }
            Op::ZRem { key, members } => {
                let mut removed: i64 = 0;
                if self.zset(&key)?.is_some() {
                    let zset = self.zset_mut(&key)?;
                    for member in &members {
                        if zset.remove(member) {
                            removed = removed.saturating_add(1);
                        }
                    }
                }
                if removed > 0 {
                    self.touch(&key);
                }
                self.prune(&key);
                Reply::Int(removed)
            }
            Op::ZRemRangeByRank { key, start, stop } => {
                let doomed: Vec<String> = self
                    .zset(&key)?
                    .map(|z| z.range(start, stop).into_iter().map(|(m, _)| m).collect())
                    .unwrap_or_default();
                if !doomed.is_empty() {
                    let zset = self.zset_mut(&key)?;
                    for member in &doomed {
                        zset.remove(member);
                    }
                    self.touch(&key);
                }
                self.prune(&key);
                Reply::Int(i64::try_from(doomed.len()).unwrap_or(i64::MAX))
            }
            Op::ZRange { key, start, stop } => {
                match self.read(&Read::ZRange { key, start, stop })? {
                    ReadReply::Members(members) => Reply::Members(members),
                    other => {
                        return Err(StoreError::UnexpectedReply(format!(
                            "ZRANGE returned {other:?}"
                        )));
                    }
                }
            }
            Op::LPush { key, value } => {
                let list = self.list_mut(&key)?;
                list.push_front(value);
                let len = i64::try_from(list.len()).unwrap_or(i64::MAX);
                self.touch(&key);
                Reply::Int(len)
            }
            Op::LTrim { key, start, stop } => {
                if self.list(&key)?.is_some() {
                    let list = self.list_mut(&key)?;
                    let before = list.len();
                    match resolve_range(list.len(), start, stop) {
                        Some(range) => {
                            list.truncate(range.end);
                            list.drain(..range.start);
                        }
                        None => list.clear(),
                    }
                    if list.len() != before {
                        self.touch(&key);
                    }
                    self.prune(&key);
                }
                Reply::Ok
            }
        };
        Ok(reply)
    }

    fn apply_batch(&mut self, batch: WriteBatch) -> Result<Vec<Reply>, StoreError> {
        self.purge_expired();
        let undo = self.snapshot(&batch);
        let mut replies = Vec::with_capacity(batch.len());
        for op in batch {
            match self.apply_op(op) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    self.rollback(undo);
                    return Err(e);
                }
            }
        }
        Ok(replies)
    }
}

/// Prior state of the keys a batch may write.
struct Undo {
    clock: u64,
    entries: Vec<KeyState>,
}

struct KeyState {
    key: String,
    value: Option<Value>,
    version: Option<u64>,
    deadline: Option<Instant>,
}

fn restore<V>(map: &mut HashMap<String, V>, key: &str, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(key.to_owned(), value);
        }
        None => {
            map.remove(key);
        }
    }
}

/// Every key `op` can modify.
fn written_keys(op: &Op) -> Vec<&str> {
    match op {
        Op::Del { keys } => keys.iter().map(String::as_str).collect(),
        Op::Rename { from, to } => vec![from.as_str(), to.as_str()],
        Op::ZRange { .. } => Vec::new(),
        other => vec![other.key()],
    }
}

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_owned(),
        expected,
    }
}

fn parse_int(key: &str, raw: &str) -> Result<i64, StoreError> {
    raw.parse::<i64>().map_err(|e| StoreError::Malformed {
        key: key.to_owned(),
        detail: format!("hash value is not an integer: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// An in-process [`VersionedStore`].
///
/// Cloning is cheap; clones share the same keyspace.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Keyspace>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of `key` (0 if never written). Exposed for tests that
    /// assert on change detection.
    pub async fn version(&self, key: &str) -> u64 {
        self.inner.read().await.version(key)
    }
}

impl KeyReader for MemoryStore {
    async fn read(&self, read: Read) -> Result<ReadReply, StoreError> {
        self.inner.read().await.read(&read)
    }
}

/// Watch handle for [`MemoryStore`]: the versions observed at watch time.
#[derive(Debug)]
pub struct MemoryTxn {
    store: MemoryStore,
    watched: Vec<(String, u64)>,
}

impl KeyReader for MemoryTxn {
    async fn read(&self, read: Read) -> Result<ReadReply, StoreError> {
        self.store.read(read).await
    }
}

impl VersionedStore for MemoryStore {
    type Txn = MemoryTxn;

    async fn watch(&self, keys: &[String]) -> Result<MemoryTxn, StoreError> {
        let space = self.inner.read().await;
        let watched = keys
            .iter()
            .map(|key| (key.clone(), space.version(key)))
            .collect();
        Ok(MemoryTxn {
            store: self.clone(),
            watched,
        })
    }

    async fn commit(&self, txn: MemoryTxn, batch: WriteBatch) -> Result<CommitOutcome, StoreError> {
        let mut space = self.inner.write().await;
        space.purge_expired();
        let changed = txn
            .watched
            .iter()
            .find(|(key, seen)| space.version(key) != *seen);
        if let Some((key, _)) = changed {
            tracing::trace!(key = %key, "watched key changed, rejecting commit");
            return Ok(CommitOutcome::Conflict);
        }
        let replies = space.apply_batch(batch)?;
        Ok(CommitOutcome::Committed(replies))
    }

    async fn unwatch(&self, txn: MemoryTxn) -> Result<(), StoreError> {
        drop(txn);
        Ok(())
    }

    async fn apply(&self, batch: WriteBatch) -> Result<Vec<Reply>, StoreError> {
        self.inner.write().await.apply_batch(batch)
    }
}
