//! The sentinel-bounded autocomplete transaction.
//!
//! Two uniquely tokened sentinels are inserted at the range bounds, then
//! a watched attempt reads their ranks and commits a batch that removes
//! both sentinels and reads the members between them. Because removal and
//! range read share one atomic batch, a committed attempt never leaves its
//! sentinels behind.

use keystone_core::{Plan, Transaction};
use keystone_store::{KeyReader, Op, Reply, StoreError, VersionedStore, WriteBatch};

use crate::prefix::{DELIMITER, prefix_range};

/// Most candidates returned by one call.
pub const MAX_RESULTS: i64 = 10;
const LAST_OFFSET: i64 = MAX_RESULTS - 1;

/// Sorted-set key holding `guild`'s member names.
pub fn members_key(guild: &str) -> String {
    format!("members:{guild}")
}

/// One autocomplete call.
#[derive(Debug, Clone)]
pub struct Autocomplete {
    key: String,
    prefix: String,
    start: String,
    end: String,
    ranged: bool,
}

impl Autocomplete {
    /// Build the call for `prefix` in `guild`, with sentinels tagged by
    /// `token`. `prefix` must already be validated.
    pub fn new(guild: &str, prefix: &str, token: &str) -> Self {
        let (start, end) = prefix_range(prefix);
        Self {
            key: members_key(guild),
            prefix: prefix.to_owned(),
            start: format!("{start}{token}"),
            end: format!("{end}{token}"),
            ranged: false,
        }
    }

    /// Batch removing both sentinels.
    pub fn cleanup(&self) -> WriteBatch {
        WriteBatch::new().with(self.remove_sentinels())
    }

    fn remove_sentinels(&self) -> Op {
        Op::ZRem {
            key: self.key.clone(),
            members: vec![self.start.clone(), self.end.clone()],
        }
    }

    fn insert(&self, member: &str) -> Op {
        Op::ZAdd {
            key: self.key.clone(),
            member: member.to_owned(),
            score: 0.0,
        }
    }
}

impl<S: VersionedStore> Transaction<S> for Autocomplete {
    type Output = Vec<String>;

    fn name(&self) -> &'static str {
        "autocomplete"
    }

    fn watch_keys(&self) -> Vec<String> {
        vec![self.key.clone()]
    }

    async fn prepare(&mut self, store: &S) -> Result<(), StoreError> {
        store
            .apply(
                WriteBatch::new()
                    .with(self.insert(&self.start))
                    .with(self.insert(&self.end)),
            )
            .await?;
        Ok(())
    }

    async fn plan(&mut self, txn: &S::Txn) -> Result<Plan, StoreError> {
        let (Some(start_rank), Some(end_rank)) = (
            txn.zrank(&self.key, &self.start).await?,
            txn.zrank(&self.key, &self.end).await?,
        ) else {
            return Ok(Plan::Retry);
        };
        let start_rank = rank_to_i64(start_rank)?;
        let end_rank = rank_to_i64(end_rank)?;

        // After the start sentinel is removed, the candidates occupy ranks
        // start_rank..=end_rank - 2.
        let mut batch = WriteBatch::new().with(self.remove_sentinels());
        self.ranged = end_rank >= start_rank.saturating_add(2);
        if self.ranged {
            let stop = start_rank
                .saturating_add(LAST_OFFSET)
                .min(end_rank.saturating_sub(2));
            batch.push(Op::ZRange {
                key: self.key.clone(),
                start: start_rank,
                stop,
            });
        }
        Ok(Plan::Commit(batch))
    }

    fn finish(self, replies: Vec<Reply>) -> Result<Vec<String>, StoreError> {
        if !self.ranged {
            return Ok(Vec::new());
        }
        let members = replies
            .into_iter()
            .next_back()
            .and_then(Reply::into_members)
            .ok_or_else(|| StoreError::UnexpectedReply("missing ZRANGE reply".to_owned()))?;
        Ok(members
            .into_iter()
            .filter(|m| !m.contains(DELIMITER) && m.starts_with(&self.prefix))
            .collect())
    }
}

fn rank_to_i64(rank: u64) -> Result<i64, StoreError> {
    i64::try_from(rank)
        .map_err(|e| StoreError::UnexpectedReply(format!("rank {rank} out of range: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_carry_the_token() {
        let call = Autocomplete::new("g", "ab", "tok");
        assert_eq!(call.key, "members:g");
        assert_eq!(call.start, "aa{tok");
        assert_eq!(call.end, "ab{tok");
    }

    #[test]
    fn unranged_finish_is_empty() {
        let call = Autocomplete::new("g", "ab", "tok");
        let result =
            <Autocomplete as Transaction<keystone_store::MemoryStore>>::finish(call, vec![Reply::Int(2)]);
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn finish_drops_sentinels_and_foreign_names() {
        let mut call = Autocomplete::new("g", "a", "tok");
        call.ranged = true;
        let replies = vec![
            Reply::Int(2),
            Reply::Members(vec![
                "aaaass".to_owned(),
                "a{stale".to_owned(),
                "acsc".to_owned(),
                "bbas".to_owned(),
            ]),
        ];
        let result =
            <Autocomplete as Transaction<keystone_store::MemoryStore>>::finish(call, replies);
        assert_eq!(result.unwrap(), vec!["aaaass", "acsc"]);
    }
}
