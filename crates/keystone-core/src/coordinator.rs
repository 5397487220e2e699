//! The optimistic transaction coordinator.
//!
//! [`TransactionCoordinator`] drives the retry loop every domain operation
//! shares:
//!
//! ```text
//! loop until deadline:
//!     prepare()                      -- optional unconditional set-up writes
//!     txn = store.watch(keys)
//!     match body.plan(&txn):
//!         Abort(reason) -> unwatch, return Rejected(reason)   (never retried)
//!         Retry         -> unwatch, next attempt
//!         Commit(batch) -> store.commit(txn, batch)
//!             Committed(replies) -> return Committed(body.finish(replies))
//!             Conflict           -> next attempt
//! return TimedOut
//! ```
//!
//! The coordinator holds no locks and no state between calls; all
//! correctness comes from the store's conditional commit. Two transactions
//! with disjoint watch sets never conflict.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use keystone_store::{CommitOutcome, Reply, StoreError, VersionedStore, WriteBatch};

use crate::config::TransactionConfig;
use crate::outcome::{RejectReason, TxOutcome};

/// What a transaction body decided after reading its snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// A business rule failed. Return to the caller without retrying.
    Abort(RejectReason),
    /// Apply this batch iff the watched keys are unchanged.
    Commit(WriteBatch),
    /// The read observed a transient state; start a fresh attempt.
    Retry,
}

/// A transaction body run by the [`TransactionCoordinator`].
///
/// One value is created per call and reused across attempts, so it can
/// carry per-call state (sentinel tokens, expected prices) between them.
pub trait Transaction<S: VersionedStore>: Send {
    /// Value produced from the batch replies on commit.
    type Output: Send;

    /// Name used in log events.
    fn name(&self) -> &'static str;

    /// Keys whose modification invalidates an attempt.
    fn watch_keys(&self) -> Vec<String>;

    /// Unconditional writes performed before each watch.
    ///
    /// Writes to a watched key made after `watch` would invalidate the
    /// transaction's own attempt, so set-up belongs here.
    fn prepare(&mut self, store: &S) -> impl Future<Output = Result<(), StoreError>> + Send {
        let _ = store;
        async { Ok(()) }
    }

    /// Read through the watch handle and decide.
    fn plan(&mut self, txn: &S::Txn) -> impl Future<Output = Result<Plan, StoreError>> + Send;

    /// Build the output from the committed batch's replies.
    fn finish(self, replies: Vec<Reply>) -> Result<Self::Output, StoreError>;
}

/// Stateless, reentrant driver for [`Transaction`]s.
#[derive(Debug)]
pub struct TransactionCoordinator<S> {
    store: Arc<S>,
    retry_delay: Option<Duration>,
}

impl<S> Clone for TransactionCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry_delay: self.retry_delay,
        }
    }
}

impl<S: VersionedStore> TransactionCoordinator<S> {
    /// Create a coordinator over `store` that retries immediately on conflict.
    pub const fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retry_delay: None,
        }
    }

    /// Create a coordinator over `store` using the configured retry delay.
    pub fn from_config(store: Arc<S>, config: &TransactionConfig) -> Self {
        Self::new(store).with_retry_delay(config.retry_delay())
    }

    /// Sleep for `delay` between a failed attempt and the next watch.
    /// A zero delay disables sleeping.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = (!delay.is_zero()).then_some(delay);
        self
    }

    /// The underlying store.
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `tx` until it commits, is rejected, or `window` elapses.
    pub async fn run<T: Transaction<S>>(
        &self,
        window: Duration,
        tx: T,
    ) -> Result<TxOutcome<T::Output>, StoreError> {
        self.run_until(deadline_after(window), tx).await
    }

    /// Run `tx` until it commits, is rejected, or `deadline` passes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails. Conflicts are never
    /// errors; they are retried.
    pub async fn run_until<T: Transaction<S>>(
        &self,
        deadline: Instant,
        mut tx: T,
    ) -> Result<TxOutcome<T::Output>, StoreError> {
        let name = tx.name();
        let keys = tx.watch_keys();
        let mut attempt: u32 = 0;

        while Instant::now() < deadline {
            attempt = attempt.saturating_add(1);
            tx.prepare(&self.store).await?;

            let txn = self.store.watch(&keys).await?;
            let plan = match tx.plan(&txn).await {
                Ok(plan) => plan,
                Err(e) => {
                    self.release(name, txn).await;
                    return Err(e);
                }
            };

            match plan {
                Plan::Abort(reason) => {
                    self.release(name, txn).await;
                    debug!(tx = name, attempt, reason = %reason, "transaction rejected");
                    return Ok(TxOutcome::Rejected(reason));
                }
                Plan::Retry => {
                    self.release(name, txn).await;
                    debug!(tx = name, attempt, "transient read, retrying");
                }
                Plan::Commit(batch) => match self.store.commit(txn, batch).await? {
                    CommitOutcome::Committed(replies) => {
                        debug!(tx = name, attempt, "transaction committed");
                        return tx.finish(replies).map(TxOutcome::Committed);
                    }
                    CommitOutcome::Conflict => {
                        debug!(tx = name, attempt, "watched key changed, retrying");
                    }
                },
            }

            if let Some(delay) = self.retry_delay {
                tokio::time::sleep(delay).await;
            }
        }

        warn!(tx = name, attempts = attempt, "transaction timed out");
        Ok(TxOutcome::TimedOut)
    }

    async fn release(&self, name: &'static str, txn: S::Txn) {
        if let Err(e) = self.store.unwatch(txn).await {
            warn!(tx = name, error = %e, "failed to release watch");
        }
    }
}

/// Longest window honored by [`TransactionCoordinator::run`].
const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

fn deadline_after(window: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(window.min(MAX_WINDOW)).unwrap_or(now)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use keystone_store::{KeyReader, MemoryStore, MemoryTxn, Op};

    use super::*;

    /// A scripted body: bumps `counter`, optionally interfering with its own
    /// watched key for the first `interfere` attempts.
    struct Counter {
        store: MemoryStore,
        attempts: Arc<AtomicU32>,
        interfere: u32,
        transient: u32,
        abort: bool,
    }

    impl Counter {
        fn new(store: &MemoryStore, attempts: &Arc<AtomicU32>) -> Self {
            Self {
                store: store.clone(),
                attempts: Arc::clone(attempts),
                interfere: 0,
                transient: 0,
                abort: false,
            }
        }
    }

    impl Transaction<MemoryStore> for Counter {
        type Output = i64;

        fn name(&self) -> &'static str {
            "counter"
        }

        fn watch_keys(&self) -> Vec<String> {
            vec!["counter".to_owned()]
        }

        async fn plan(&mut self, txn: &MemoryTxn) -> Result<Plan, StoreError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.abort {
                return Ok(Plan::Abort(RejectReason::NotOwned));
            }
            if attempt <= self.transient {
                return Ok(Plan::Retry);
            }
            // Type-checks the watched key through the handle.
            txn.hget("counter", "n").await?;
            if attempt <= self.interfere {
                self.store
                    .apply(WriteBatch::new().with(Op::HIncrBy {
                        key: "counter".to_owned(),
                        field: "other".to_owned(),
                        delta: 1,
                    }))
                    .await?;
            }
            Ok(Plan::Commit(WriteBatch::new().with(Op::HIncrBy {
                key: "counter".to_owned(),
                field: "n".to_owned(),
                delta: 1,
            })))
        }

        fn finish(self, replies: Vec<Reply>) -> Result<i64, StoreError> {
            replies
                .first()
                .and_then(Reply::as_int)
                .ok_or_else(|| StoreError::UnexpectedReply("missing HINCRBY reply".to_owned()))
        }
    }

    fn coordinator(store: &MemoryStore) -> TransactionCoordinator<MemoryStore> {
        TransactionCoordinator::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn commits_on_first_attempt_without_contention() {
        let store = MemoryStore::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let outcome = coordinator(&store)
            .run(Duration::from_secs(1), Counter::new(&store, &attempts))
            .await
            .unwrap();

        assert_eq!(outcome, TxOutcome::Committed(1));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_delay_comes_from_config() {
        let store = Arc::new(MemoryStore::new());
        let config = TransactionConfig {
            retry_delay_ms: 25,
            ..TransactionConfig::default()
        };

        let configured = TransactionCoordinator::from_config(Arc::clone(&store), &config);
        let immediate = TransactionCoordinator::from_config(store, &TransactionConfig::default());

        assert_eq!(configured.retry_delay, Some(Duration::from_millis(25)));
        assert_eq!(immediate.retry_delay, None);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let store = MemoryStore::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let mut tx = Counter::new(&store, &attempts);
        tx.abort = true;

        let outcome = coordinator(&store)
            .run(Duration::from_secs(1), tx)
            .await
            .unwrap();

        assert_eq!(outcome, TxOutcome::Rejected(RejectReason::NotOwned));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(store.hget("counter", "n").await.unwrap(), None);
    }

    #[tokio::test]
    async fn conflict_is_retried_until_commit() {
        let store = MemoryStore::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let mut tx = Counter::new(&store, &attempts);
        tx.interfere = 2;

        let outcome = coordinator(&store)
            .run(Duration::from_secs(1), tx)
            .await
            .unwrap();

        assert_eq!(outcome, TxOutcome::Committed(1));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.hget("counter", "other").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn transient_read_is_retried() {
        let store = MemoryStore::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let mut tx = Counter::new(&store, &attempts);
        tx.transient = 1;

        let outcome = coordinator(&store)
            .run(Duration::from_secs(1), tx)
            .await
            .unwrap();

        assert!(outcome.is_committed());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_conflict_times_out() {
        let store = MemoryStore::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let mut tx = Counter::new(&store, &attempts);
        tx.interfere = u32::MAX;

        let outcome = coordinator(&store)
            .with_retry_delay(Duration::from_millis(10))
            .run(Duration::from_millis(100), tx)
            .await
            .unwrap();

        assert_eq!(outcome, TxOutcome::TimedOut);
        assert!(attempts.load(Ordering::SeqCst) >= 2);
        assert_eq!(store.hget("counter", "n").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_deadline_makes_no_attempt() {
        let store = MemoryStore::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let deadline = Instant::now();

        let outcome = coordinator(&store)
            .run_until(deadline, Counter::new(&store, &attempts))
            .await
            .unwrap();

        assert_eq!(outcome, TxOutcome::TimedOut);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_errors_are_not_outcomes() {
        let store = MemoryStore::new();
        store
            .apply(WriteBatch::new().with(Op::Set {
                key: "counter".to_owned(),
                value: "scalar".to_owned(),
            }))
            .await
            .unwrap();
        let attempts = Arc::new(AtomicU32::new(0));

        let result = coordinator(&store)
            .run(Duration::from_secs(1), Counter::new(&store, &attempts))
            .await;

        assert!(matches!(result, Err(StoreError::WrongType { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
