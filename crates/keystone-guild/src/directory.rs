//! The [`GuildDirectory`] entry points.

use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use keystone_core::config::TransactionConfig;
use keystone_core::{RejectReason, TransactionCoordinator, TxOutcome};
use keystone_store::{KeyReader, Op, StoreError, VersionedStore, WriteBatch};

use crate::autocomplete::{Autocomplete, members_key};
use crate::error::GuildError;
use crate::prefix::invalid_char;

/// Guild membership plus prefix autocomplete over member names.
#[derive(Debug, Clone)]
pub struct GuildDirectory<S> {
    coordinator: TransactionCoordinator<S>,
    window: Duration,
}

impl<S: VersionedStore> GuildDirectory<S> {
    /// Create a directory with a 5 second autocomplete window.
    pub fn new(coordinator: TransactionCoordinator<S>) -> Self {
        Self {
            coordinator,
            window: Duration::from_secs(5),
        }
    }

    /// Create a directory using the configured autocomplete window.
    pub fn from_config(coordinator: TransactionCoordinator<S>, config: &TransactionConfig) -> Self {
        Self::new(coordinator).with_window(config.autocomplete_window())
    }

    /// Override the autocomplete window.
    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Add `member` to `guild`.
    pub async fn join_guild(&self, guild: &str, member: &str) -> Result<(), GuildError> {
        if member.is_empty() || invalid_char(member).is_some() {
            return Err(GuildError::InvalidName(member.to_owned()));
        }
        self.coordinator
            .store()
            .apply(WriteBatch::new().with(Op::ZAdd {
                key: members_key(guild),
                member: member.to_owned(),
                score: 0.0,
            }))
            .await?;
        debug!(guild, member, "joined guild");
        Ok(())
    }

    /// Remove `member` from `guild`.
    pub async fn leave_guild(&self, guild: &str, member: &str) -> Result<(), GuildError> {
        self.coordinator
            .store()
            .apply(WriteBatch::new().with(Op::ZRem {
                key: members_key(guild),
                members: vec![member.to_owned()],
            }))
            .await?;
        debug!(guild, member, "left guild");
        Ok(())
    }

    /// Every member of `guild` in lexicographic order.
    pub async fn members(&self, guild: &str) -> Result<Vec<String>, StoreError> {
        self.coordinator
            .store()
            .zrange(&members_key(guild), 0, -1)
            .await
    }

    /// Up to 10 members of `guild` whose names start with `prefix`.
    ///
    /// Rejects with [`RejectReason::InvalidPrefix`] if `prefix` contains a
    /// character outside `a`..`z`. The range sentinels are gone from the
    /// member set when this returns, whatever the outcome.
    pub async fn autocomplete_prefix(
        &self,
        guild: &str,
        prefix: &str,
    ) -> Result<TxOutcome<Vec<String>>, StoreError> {
        if let Some(ch) = invalid_char(prefix) {
            return Ok(TxOutcome::Rejected(RejectReason::InvalidPrefix(ch)));
        }

        let token = Uuid::new_v4().to_string();
        let call = Autocomplete::new(guild, prefix, &token);
        let cleanup = call.cleanup();

        let result = self.coordinator.run(self.window, call).await;
        if !matches!(result, Ok(TxOutcome::Committed(_))) {
            if let Err(e) = self.coordinator.store().apply(cleanup).await {
                warn!(guild, prefix, error = %e, "failed to remove autocomplete sentinels");
            }
        }
        if let Ok(outcome) = &result {
            debug!(guild, prefix, outcome = outcome.label(), "autocomplete");
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use keystone_store::MemoryStore;

    use super::*;

    fn directory(store: &MemoryStore) -> GuildDirectory<MemoryStore> {
        GuildDirectory::new(TransactionCoordinator::new(Arc::new(store.clone())))
    }

    #[test]
    fn window_comes_from_config() {
        let config = TransactionConfig {
            autocomplete_window_ms: 750,
            ..TransactionConfig::default()
        };
        let dir = GuildDirectory::from_config(
            TransactionCoordinator::new(Arc::new(MemoryStore::new())),
            &config,
        );
        assert_eq!(dir.window, Duration::from_millis(750));
    }

    async fn seeded(names: &[&str]) -> (MemoryStore, GuildDirectory<MemoryStore>) {
        let store = MemoryStore::new();
        let dir = directory(&store);
        for name in names {
            dir.join_guild("g", name).await.unwrap();
        }
        (store, dir)
    }

    #[tokio::test]
    async fn prefix_a_matches_a_names_only() {
        let (_store, dir) = seeded(&["aaaass", "bbas", "acsc"]).await;

        let outcome = dir.autocomplete_prefix("g", "a").await.unwrap();

        assert_eq!(
            outcome,
            TxOutcome::Committed(vec!["aaaass".to_owned(), "acsc".to_owned()])
        );
        assert_eq!(dir.members("g").await.unwrap(), vec!["aaaass", "acsc", "bbas"]);
    }

    #[tokio::test]
    async fn results_are_capped_at_ten() {
        let names: Vec<String> = ('a'..='z').map(|c| format!("ab{c}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (_store, dir) = seeded(&refs).await;

        let found = dir
            .autocomplete_prefix("g", "ab")
            .await
            .unwrap()
            .committed()
            .unwrap();

        assert_eq!(found.len(), 10);
        assert_eq!(found.first().map(String::as_str), Some("aba"));
        assert_eq!(found.last().map(String::as_str), Some("abj"));
        assert_eq!(dir.members("g").await.unwrap().len(), 26);
    }

    #[tokio::test]
    async fn no_match_returns_empty() {
        let (_store, dir) = seeded(&["bbas"]).await;
        let outcome = dir.autocomplete_prefix("g", "a").await.unwrap();
        assert_eq!(outcome, TxOutcome::Committed(Vec::new()));
        assert_eq!(dir.members("g").await.unwrap(), vec!["bbas"]);
    }

    #[tokio::test]
    async fn empty_guild_leaves_no_key_behind() {
        let (store, dir) = seeded(&[]).await;
        let outcome = dir.autocomplete_prefix("g", "a").await.unwrap();
        assert_eq!(outcome, TxOutcome::Committed(Vec::new()));
        assert!(!store.exists(&members_key("g")).await.unwrap());
    }

    #[tokio::test]
    async fn exact_name_matches_its_own_prefix() {
        let (_store, dir) = seeded(&["ab", "abc", "b"]).await;
        let found = dir.autocomplete_prefix("g", "ab").await.unwrap().committed();
        assert_eq!(found, Some(vec!["ab".to_owned(), "abc".to_owned()]));
    }

    #[tokio::test]
    async fn stale_sentinels_are_filtered() {
        let (store, dir) = seeded(&["aaaass", "acsc"]).await;
        store
            .apply(WriteBatch::new().with(Op::ZAdd {
                key: members_key("g"),
                member: "a{leftover".to_owned(),
                score: 0.0,
            }))
            .await
            .unwrap();

        let found = dir.autocomplete_prefix("g", "a").await.unwrap().committed();

        assert_eq!(found, Some(vec!["aaaass".to_owned(), "acsc".to_owned()]));
    }

    #[tokio::test]
    async fn invalid_prefix_is_rejected() {
        let (store, dir) = seeded(&["abc"]).await;
        let before = store.version(&members_key("g")).await;

        let outcome = dir.autocomplete_prefix("g", "a{").await.unwrap();

        assert_eq!(outcome, TxOutcome::Rejected(RejectReason::InvalidPrefix('{')));
        assert_eq!(store.version(&members_key("g")).await, before);
    }

    #[tokio::test]
    async fn invalid_names_cannot_join() {
        let (_store, dir) = seeded(&[]).await;
        for name in ["", "Bob", "a{b", "x y"] {
            let result = dir.join_guild("g", name).await;
            assert!(matches!(result, Err(GuildError::InvalidName(_))), "{name:?}");
        }
    }

    #[tokio::test]
    async fn leaving_removes_the_member() {
        let (_store, dir) = seeded(&["abc", "abd"]).await;
        dir.leave_guild("g", "abc").await.unwrap();
        let found = dir.autocomplete_prefix("g", "ab").await.unwrap().committed();
        assert_eq!(found, Some(vec!["abd".to_owned()]));
    }

    #[tokio::test]
    async fn timeout_still_removes_sentinels() {
        let (_store, dir) = seeded(&["abc"]).await;
        let dir = dir.with_window(Duration::ZERO);

        let outcome = dir.autocomplete_prefix("g", "ab").await.unwrap();

        assert_eq!(outcome, TxOutcome::TimedOut);
        assert_eq!(dir.members("g").await.unwrap(), vec!["abc"]);
    }
}
