//! Login sessions, recently viewed items, and shopping carts.
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `login:` | hash | token -> user |
//! | `recent:` | sorted set | token scored by last-seen time |
//! | `viewed:<token>` | sorted set | item scored by view time, newest 25 kept |
//! | `cart:<token>` | hash | item -> count |

use std::sync::Arc;

use chrono::{DateTime, Utc};

use keystone_store::{KeyReader, Op, StoreError, VersionedStore, WriteBatch};

use crate::clock::unix_seconds;

/// Hash mapping session tokens to users.
pub const LOGIN: &str = "login:";

/// Sorted set ordering session tokens by last activity.
pub const RECENT: &str = "recent:";

/// Viewed items kept per session.
pub const VIEWED_LIMIT: i64 = 25;
const VIEWED_TRIM_STOP: i64 = -(VIEWED_LIMIT + 1);

/// Viewed-items sorted set of `token`.
pub fn viewed(token: &str) -> String {
    format!("viewed:{token}")
}

/// Cart hash of `token`.
pub fn cart(token: &str) -> String {
    format!("cart:{token}")
}

/// Session bookkeeping for a web front end.
#[derive(Debug, Clone)]
pub struct SessionStore<S> {
    store: Arc<S>,
}

impl<S: VersionedStore> SessionStore<S> {
    /// Wrap `store`.
    pub const fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// User logged in with `token`, if any.
    pub async fn check_token(&self, token: &str) -> Result<Option<String>, StoreError> {
        self.store.hget(LOGIN, token).await
    }

    /// Record activity for `token`, optionally viewing `item`.
    pub async fn update_token(
        &self,
        token: &str,
        user: &str,
        item: Option<&str>,
    ) -> Result<(), StoreError> {
        self.update_token_at(Utc::now(), token, user, item).await
    }

    /// [`update_token`](Self::update_token) with an explicit clock reading.
    pub async fn update_token_at(
        &self,
        now: DateTime<Utc>,
        token: &str,
        user: &str,
        item: Option<&str>,
    ) -> Result<(), StoreError> {
        let timestamp = unix_seconds(now);
        let mut batch = WriteBatch::new()
            .with(Op::HSet {
                key: LOGIN.to_owned(),
                field: token.to_owned(),
                value: user.to_owned(),
            })
            .with(Op::ZAdd {
                key: RECENT.to_owned(),
                member: token.to_owned(),
                score: timestamp,
            });
        if let Some(item) = item {
            let viewed = viewed(token);
            batch.push(Op::ZAdd {
                key: viewed.clone(),
                member: item.to_owned(),
                score: timestamp,
            });
            batch.push(Op::ZRemRangeByRank {
                key: viewed,
                start: 0,
                stop: VIEWED_TRIM_STOP,
            });
        }
        self.store.apply(batch).await?;
        Ok(())
    }

    /// Items `token` viewed, oldest first.
    pub async fn viewed_items(&self, token: &str) -> Result<Vec<String>, StoreError> {
        self.store.zrange(&viewed(token), 0, -1).await
    }

    /// Set `item`'s count in `token`'s cart; a count of zero or less
    /// removes it.
    pub async fn add_to_cart(&self, token: &str, item: &str, count: i64) -> Result<(), StoreError> {
        let op = if count <= 0 {
            Op::HDel {
                key: cart(token),
                fields: vec![item.to_owned()],
            }
        } else {
            Op::HSet {
                key: cart(token),
                field: item.to_owned(),
                value: count.to_string(),
            }
        };
        self.store.apply(WriteBatch::new().with(op)).await?;
        Ok(())
    }

    /// Count of `item` in `token`'s cart.
    pub async fn cart_count(&self, token: &str, item: &str) -> Result<Option<i64>, StoreError> {
        let key = cart(token);
        match self.store.hget(&key, item).await? {
            Some(raw) => raw.parse().map(Some).map_err(|e| StoreError::Malformed {
                key,
                detail: format!("cart count {raw:?}: {e}"),
            }),
            None => Ok(None),
        }
    }

    /// Number of tracked sessions.
    pub async fn session_count(&self) -> Result<u64, StoreError> {
        self.store.zcard(RECENT).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::TimeDelta;
    use keystone_store::MemoryStore;

    use super::*;

    fn sessions() -> SessionStore<MemoryStore> {
        SessionStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn token_maps_to_user() {
        let sessions = sessions();
        assert_eq!(sessions.check_token("t1").await.unwrap(), None);

        sessions.update_token("t1", "ann", None).await.unwrap();

        assert_eq!(sessions.check_token("t1").await.unwrap().as_deref(), Some("ann"));
        assert_eq!(sessions.session_count().await.unwrap(), 1);
        assert!(sessions.viewed_items("t1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_the_newest_views_are_kept() {
        let sessions = sessions();
        let start = Utc::now();
        for i in 0..30 {
            let now = start + TimeDelta::seconds(i);
            let item = format!("item{i:02}");
            sessions.update_token_at(now, "t1", "ann", Some(&item)).await.unwrap();
        }

        let viewed = sessions.viewed_items("t1").await.unwrap();

        assert_eq!(viewed.len(), 25);
        assert_eq!(viewed.first().map(String::as_str), Some("item05"));
        assert_eq!(viewed.last().map(String::as_str), Some("item29"));
    }

    #[tokio::test]
    async fn cart_counts_set_and_clear() {
        let sessions = sessions();
        sessions.add_to_cart("t1", "sku", 3).await.unwrap();
        assert_eq!(sessions.cart_count("t1", "sku").await.unwrap(), Some(3));

        sessions.add_to_cart("t1", "sku", 0).await.unwrap();
        assert_eq!(sessions.cart_count("t1", "sku").await.unwrap(), None);

        sessions.add_to_cart("t1", "other", -2).await.unwrap();
        assert_eq!(sessions.cart_count("t1", "other").await.unwrap(), None);
    }
}
