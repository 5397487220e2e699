//! Whole-page caching for rendered responses.
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `cache:<hash>` | string | rendered page, expiring after the TTL |

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;

use tracing::debug;

use keystone_store::{KeyReader, Op, StoreError, VersionedStore, WriteBatch};

/// Seconds a cached page lives.
pub const PAGE_TTL_SECONDS: u64 = 300;

/// Cache key for `request`.
///
/// The hash only has to be stable for the lifetime of a cached page.
pub fn page_key(request: &str) -> String {
    let mut hasher = DefaultHasher::new();
    request.hash(&mut hasher);
    format!("cache:{:016x}", hasher.finish())
}

/// Serves repeated requests from the store instead of re-rendering.
#[derive(Debug, Clone)]
pub struct PageCache<S> {
    store: Arc<S>,
    ttl_seconds: u64,
}

impl<S: VersionedStore> PageCache<S> {
    /// Wrap `store`, caching pages for [`PAGE_TTL_SECONDS`].
    pub const fn new(store: Arc<S>) -> Self {
        Self {
            store,
            ttl_seconds: PAGE_TTL_SECONDS,
        }
    }

    /// Override the page lifetime. Zero is raised to one second.
    #[must_use]
    pub fn with_ttl(mut self, seconds: u64) -> Self {
        self.ttl_seconds = seconds.max(1);
        self
    }

    /// Return the cached page for `request`, or render it with `render`
    /// and cache the result.
    ///
    /// An empty cached page counts as a miss.
    pub async fn cache_request<F>(&self, request: &str, render: F) -> Result<String, StoreError>
    where
        F: FnOnce(&str) -> String,
    {
        let key = page_key(request);
        let cached = self.store.get(&key).await?;
        if let Some(page) = cached.filter(|page| !page.is_empty()) {
            return Ok(page);
        }

        let page = render(request);
        self.store
            .apply(
                WriteBatch::new()
                    .with(Op::Set {
                        key: key.clone(),
                        value: page.clone(),
                    })
                    .with(Op::Expire {
                        key: key.clone(),
                        seconds: self.ttl_seconds,
                    }),
            )
            .await?;
        debug!(key, ttl = self.ttl_seconds, "cached page");
        Ok(page)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use keystone_store::MemoryStore;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pages_are_served_from_cache_until_they_expire() {
        let cache = PageCache::new(Arc::new(MemoryStore::new()));
        let renders = AtomicU32::new(0);
        let render = |request: &str| {
            renders.fetch_add(1, Ordering::SeqCst);
            format!("<html>{request}</html>")
        };

        let first = cache.cache_request("/item/7", render).await.unwrap();
        let second = cache.cache_request("/item/7", render).await.unwrap();

        assert_eq!(first, "<html>/item/7</html>");
        assert_eq!(second, first);
        assert_eq!(renders.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(PAGE_TTL_SECONDS - 1)).await;
        cache.cache_request("/item/7", render).await.unwrap();
        assert_eq!(renders.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        cache.cache_request("/item/7", render).await.unwrap();
        assert_eq!(renders.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn distinct_requests_are_cached_apart() {
        let store = Arc::new(MemoryStore::new());
        let cache = PageCache::new(Arc::clone(&store));

        cache.cache_request("/a", |_| "A".to_owned()).await.unwrap();
        cache.cache_request("/b", |_| "B".to_owned()).await.unwrap();

        assert_ne!(page_key("/a"), page_key("/b"));
        assert_eq!(store.get(&page_key("/a")).await.unwrap().as_deref(), Some("A"));
        assert_eq!(store.get(&page_key("/b")).await.unwrap().as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn empty_pages_are_rendered_again() {
        let cache = PageCache::new(Arc::new(MemoryStore::new()));
        cache.cache_request("/empty", |_| String::new()).await.unwrap();

        let page = cache.cache_request("/empty", |_| "full".to_owned()).await.unwrap();

        assert_eq!(page, "full");
    }
}
