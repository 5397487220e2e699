//! Single sweep passes over sessions and the row-cache schedule.
//!
//! Each pass issues plain, unconditional writes. Both only remove or
//! rewrite entries that are already over the limit or already due, so a
//! pass that fails halfway is safe to repeat.

use chrono::{DateTime, Utc};
use tracing::debug;

use keystone_store::{KeyReader, Op, StoreError, VersionedStore, WriteBatch};

use crate::clock::unix_seconds;
use crate::row_cache::{DELAY, RowSource, SCHEDULE, cached_row_key};
use crate::session::{LOGIN, RECENT, cart, viewed};

/// Evict the oldest sessions above `limit`, at most `batch_size` per pass.
///
/// Returns the number of sessions evicted.
pub async fn sweep_sessions_once<S: VersionedStore>(
    store: &S,
    limit: u64,
    batch_size: u64,
) -> Result<usize, StoreError> {
    let size = store.zcard(RECENT).await?;
    let excess = size.saturating_sub(limit).min(batch_size);
    if excess == 0 {
        return Ok(0);
    }
    let stop = i64::try_from(excess.saturating_sub(1)).unwrap_or(i64::MAX);
    let tokens = store.zrange(RECENT, 0, stop).await?;
    if tokens.is_empty() {
        return Ok(0);
    }

    let session_keys = tokens
        .iter()
        .flat_map(|token| [viewed(token), cart(token)])
        .collect();
    let batch = WriteBatch::new()
        .with(Op::Del { keys: session_keys })
        .with(Op::HDel {
            key: LOGIN.to_owned(),
            fields: tokens.clone(),
        })
        .with(Op::ZRem {
            key: RECENT.to_owned(),
            members: tokens.clone(),
        });
    store.apply(batch).await?;

    debug!(evicted = tokens.len(), size, limit, "evicted sessions");
    Ok(tokens.len())
}

/// What one invalidation pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepAction {
    /// Nothing was due.
    Idle,
    /// The row was dropped from the cache and the schedule.
    Invalidated(String),
    /// The row was reloaded and rescheduled.
    Refreshed(String),
}

/// Handle the earliest scheduled row if it is due at `now`.
///
/// A row whose delay is zero, negative or missing is invalidated. A row
/// with a positive delay is reloaded from `source` into the cache and
/// rescheduled `delay` seconds after `now`; if the source no longer has
/// it, it is invalidated instead.
pub async fn sweep_invalidations_once<S, R>(
    store: &S,
    source: &R,
    now: DateTime<Utc>,
) -> Result<SweepAction, StoreError>
where
    S: VersionedStore,
    R: RowSource + ?Sized,
{
    let next = store.zrange_withscores(SCHEDULE, 0, 0).await?;
    let now_seconds = unix_seconds(now);
    let Some((row_id, due)) = next.into_iter().next() else {
        return Ok(SweepAction::Idle);
    };
    if due > now_seconds {
        return Ok(SweepAction::Idle);
    }

    let delay = store
        .zscore(DELAY, &row_id)
        .await?
        .filter(|delay| *delay > 0.0);
    let row = delay.and_then(|_| source.load(&row_id));

    match (delay, row) {
        (Some(delay), Some(row)) => {
            store
                .apply(
                    WriteBatch::new()
                        .with(Op::ZAdd {
                            key: SCHEDULE.to_owned(),
                            member: row_id.clone(),
                            score: now_seconds + delay,
                        })
                        .with(Op::Set {
                            key: cached_row_key(&row_id),
                            value: row.to_string(),
                        }),
                )
                .await?;
            debug!(row = %row_id, delay, "refreshed cached row");
            Ok(SweepAction::Refreshed(row_id))
        }
        _ => {
            store
                .apply(
                    WriteBatch::new()
                        .with(Op::ZRem {
                            key: DELAY.to_owned(),
                            members: vec![row_id.clone()],
                        })
                        .with(Op::ZRem {
                            key: SCHEDULE.to_owned(),
                            members: vec![row_id.clone()],
                        })
                        .with(Op::Del {
                            keys: vec![cached_row_key(&row_id)],
                        }),
                )
                .await?;
            debug!(row = %row_id, "invalidated cached row");
            Ok(SweepAction::Invalidated(row_id))
        }
    }
}
