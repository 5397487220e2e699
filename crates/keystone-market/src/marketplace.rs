//! The [`Marketplace`] entry points.

use std::time::Duration;

use tracing::info;

use keystone_core::config::TransactionConfig;
use keystone_core::{RejectReason, TransactionCoordinator, TxOutcome};
use keystone_store::{KeyReader, Op, StoreError, VersionedStore, WriteBatch};

use crate::keys::{self, FUNDS_FIELD, MARKET};
use crate::trade::{ListItem, Purchase, PurchaseItem, parse_funds};

/// Attempt windows for marketplace transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketWindows {
    /// Window for [`Marketplace::list_item`].
    pub list: Duration,
    /// Window for [`Marketplace::purchase_item`].
    pub purchase: Duration,
}

impl Default for MarketWindows {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(5),
            purchase: Duration::from_secs(10),
        }
    }
}

impl From<&TransactionConfig> for MarketWindows {
    fn from(config: &TransactionConfig) -> Self {
        Self {
            list: config.list_window(),
            purchase: config.purchase_window(),
        }
    }
}

/// Listing and purchasing with funds and inventory kept consistent.
///
/// Cheap to clone; clones share the coordinator's store.
#[derive(Debug, Clone)]
pub struct Marketplace<S> {
    coordinator: TransactionCoordinator<S>,
    windows: MarketWindows,
}

impl<S: VersionedStore> Marketplace<S> {
    /// Create a marketplace with the default windows.
    pub fn new(coordinator: TransactionCoordinator<S>) -> Self {
        Self {
            coordinator,
            windows: MarketWindows::default(),
        }
    }

    /// Create a marketplace using the configured windows.
    pub fn from_config(coordinator: TransactionCoordinator<S>, config: &TransactionConfig) -> Self {
        Self::new(coordinator).with_windows(MarketWindows::from(config))
    }

    /// Override the attempt windows.
    #[must_use]
    pub fn with_windows(mut self, windows: MarketWindows) -> Self {
        self.windows = windows;
        self
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Move `item` from `seller`'s inventory onto the market at `price`.
    ///
    /// Rejects with [`RejectReason::NotOwned`] if the seller does not hold
    /// the item, or [`RejectReason::InvalidPrice`] if `price` is negative.
    pub async fn list_item(
        &self,
        item: &str,
        seller: &str,
        price: i64,
    ) -> Result<TxOutcome<()>, StoreError> {
        if price < 0 {
            return Ok(TxOutcome::Rejected(RejectReason::InvalidPrice(price)));
        }
        let body = ListItem {
            item: item.to_owned(),
            seller: seller.to_owned(),
            price,
        };
        let outcome = self.coordinator.run(self.windows.list, body).await?;
        info!(item, seller, price, outcome = outcome.label(), "list item");
        Ok(outcome)
    }

    /// Buy `item` from `seller` at `expected_price`.
    ///
    /// Rejects with [`RejectReason::StaleOrInsufficientFunds`] if the listing
    /// is gone, its price differs from `expected_price`, or the buyer cannot
    /// afford it; with [`RejectReason::NotFound`] if the buyer has no account.
    pub async fn purchase_item(
        &self,
        buyer: &str,
        item: &str,
        seller: &str,
        expected_price: i64,
    ) -> Result<TxOutcome<Purchase>, StoreError> {
        let body = PurchaseItem::new(buyer, item, seller, expected_price);
        let outcome = self.coordinator.run(self.windows.purchase, body).await?;
        info!(
            buyer,
            item,
            seller,
            expected_price,
            outcome = outcome.label(),
            "purchase item"
        );
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Collaborators
    // -----------------------------------------------------------------------

    /// Create or reset `id`'s account with `funds`.
    pub async fn open_account(&self, id: &str, funds: i64) -> Result<(), StoreError> {
        self.coordinator
            .store()
            .apply(WriteBatch::new().with(Op::HSet {
                key: keys::account(id),
                field: FUNDS_FIELD.to_owned(),
                value: funds.to_string(),
            }))
            .await?;
        Ok(())
    }

    /// Add `amount` to `id`'s funds, returning the new balance.
    pub async fn deposit(&self, id: &str, amount: i64) -> Result<i64, StoreError> {
        let replies = self
            .coordinator
            .store()
            .apply(WriteBatch::new().with(Op::HIncrBy {
                key: keys::account(id),
                field: FUNDS_FIELD.to_owned(),
                delta: amount,
            }))
            .await?;
        replies
            .first()
            .and_then(|reply| reply.as_int())
            .ok_or_else(|| StoreError::UnexpectedReply("missing HINCRBY reply".to_owned()))
    }

    /// Put `item` into `owner`'s inventory.
    pub async fn stock_item(&self, owner: &str, item: &str) -> Result<(), StoreError> {
        self.coordinator
            .store()
            .apply(WriteBatch::new().with(Op::SAdd {
                key: keys::inventory(owner),
                member: item.to_owned(),
            }))
            .await?;
        Ok(())
    }

    /// Current funds of `id`, or `None` if the account does not exist.
    pub async fn funds(&self, id: &str) -> Result<Option<i64>, StoreError> {
        let key = keys::account(id);
        match self.coordinator.store().hget(&key, FUNDS_FIELD).await? {
            Some(raw) => parse_funds(&key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Items held by `owner`, sorted.
    pub async fn inventory(&self, owner: &str) -> Result<Vec<String>, StoreError> {
        self.coordinator
            .store()
            .smembers(&keys::inventory(owner))
            .await
    }

    /// Listed price of `item` from `seller`, if listed.
    pub async fn listing_price(&self, item: &str, seller: &str) -> Result<Option<f64>, StoreError> {
        self.coordinator
            .store()
            .zscore(MARKET, &keys::listing(item, seller))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::sync::Arc;

    use keystone_store::MemoryStore;

    use super::*;

    #[test]
    fn windows_come_from_config() {
        let config = TransactionConfig {
            list_window_ms: 100,
            purchase_window_ms: 200,
            ..TransactionConfig::default()
        };
        let market = Marketplace::from_config(
            TransactionCoordinator::new(Arc::new(MemoryStore::new())),
            &config,
        );
        assert_eq!(market.windows.list, Duration::from_millis(100));
        assert_eq!(market.windows.purchase, Duration::from_millis(200));
    }

    async fn market() -> (MemoryStore, Marketplace<MemoryStore>) {
        let store = MemoryStore::new();
        let market = Marketplace::new(TransactionCoordinator::new(Arc::new(store.clone())));
        market.open_account("17", 0).await.unwrap();
        market.open_account("27", 15).await.unwrap();
        market.stock_item("17", "sku1").await.unwrap();
        (store, market)
    }

    #[tokio::test]
    async fn list_then_purchase_moves_funds_and_item() {
        let (_store, market) = market().await;

        let listed = market.list_item("sku1", "17", 10).await.unwrap();
        assert_eq!(listed, TxOutcome::Committed(()));

        let bought = market.purchase_item("27", "sku1", "17", 10).await.unwrap();
        assert_eq!(
            bought,
            TxOutcome::Committed(Purchase {
                price: 10,
                buyer_funds: 5,
                seller_funds: 10,
            })
        );
        assert_eq!(market.funds("27").await.unwrap(), Some(5));
        assert_eq!(market.funds("17").await.unwrap(), Some(10));
        assert_eq!(market.inventory("27").await.unwrap(), vec!["sku1"]);
        assert!(market.inventory("17").await.unwrap().is_empty());
        assert_eq!(market.listing_price("sku1", "17").await.unwrap(), None);
    }

    #[tokio::test]
    async fn listing_an_unowned_item_is_rejected() {
        let (store, market) = market().await;

        let outcome = market.list_item("sku9", "17", 10).await.unwrap();

        assert_eq!(outcome, TxOutcome::Rejected(RejectReason::NotOwned));
        assert_eq!(store.zcard(MARKET).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn negative_price_is_rejected_before_touching_the_store() {
        let (store, market) = market().await;
        let before = store.version(&keys::inventory("17")).await;

        let outcome = market.list_item("sku1", "17", -1).await.unwrap();

        assert_eq!(outcome, TxOutcome::Rejected(RejectReason::InvalidPrice(-1)));
        assert_eq!(store.version(&keys::inventory("17")).await, before);
        assert_eq!(market.inventory("17").await.unwrap(), vec!["sku1"]);
    }

    #[tokio::test]
    async fn changed_price_is_stale() {
        let (store, market) = market().await;
        market.list_item("sku1", "17", 10).await.unwrap();
        store
            .apply(WriteBatch::new().with(Op::ZAdd {
                key: MARKET.to_owned(),
                member: keys::listing("sku1", "17"),
                score: 12.0,
            }))
            .await
            .unwrap();

        let outcome = market.purchase_item("27", "sku1", "17", 10).await.unwrap();

        assert_eq!(
            outcome,
            TxOutcome::Rejected(RejectReason::StaleOrInsufficientFunds)
        );
        assert_eq!(market.funds("27").await.unwrap(), Some(15));
        assert_eq!(market.funds("17").await.unwrap(), Some(0));
        assert_eq!(market.listing_price("sku1", "17").await.unwrap(), Some(12.0));
    }

    #[tokio::test]
    async fn fractional_listing_price_is_stale() {
        let (store, market) = market().await;
        market.list_item("sku1", "17", 10).await.unwrap();
        store
            .apply(WriteBatch::new().with(Op::ZAdd {
                key: MARKET.to_owned(),
                member: keys::listing("sku1", "17"),
                score: 10.5,
            }))
            .await
            .unwrap();

        let outcome = market.purchase_item("27", "sku1", "17", 10).await.unwrap();

        assert_eq!(
            outcome,
            TxOutcome::Rejected(RejectReason::StaleOrInsufficientFunds)
        );
        assert_eq!(market.funds("27").await.unwrap(), Some(15));
        assert!(market.inventory("27").await.unwrap().is_empty());
        assert_eq!(market.listing_price("sku1", "17").await.unwrap(), Some(10.5));
    }

    #[tokio::test]
    async fn insufficient_funds_is_rejected() {
        let (_store, market) = market().await;
        market.list_item("sku1", "17", 20).await.unwrap();

        let outcome = market.purchase_item("27", "sku1", "17", 20).await.unwrap();

        assert_eq!(
            outcome.rejection(),
            Some(&RejectReason::StaleOrInsufficientFunds)
        );
        assert_eq!(market.funds("27").await.unwrap(), Some(15));
    }

    #[tokio::test]
    async fn missing_listing_is_stale() {
        let (_store, market) = market().await;

        let outcome = market.purchase_item("27", "sku1", "17", 10).await.unwrap();

        assert_eq!(
            outcome.rejection(),
            Some(&RejectReason::StaleOrInsufficientFunds)
        );
    }

    #[tokio::test]
    async fn buyer_without_account_is_not_found() {
        let (_store, market) = market().await;
        market.list_item("sku1", "17", 10).await.unwrap();

        let outcome = market.purchase_item("99", "sku1", "17", 10).await.unwrap();

        assert_eq!(
            outcome,
            TxOutcome::Rejected(RejectReason::NotFound(keys::account("99")))
        );
        assert!(market.listing_price("sku1", "17").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deposit_returns_new_balance() {
        let (_store, market) = market().await;
        assert_eq!(market.deposit("27", 5).await.unwrap(), 20);
        assert_eq!(market.deposit("new", 3).await.unwrap(), 3);
    }

    #[test]
    fn windows_follow_config() {
        let config = TransactionConfig {
            list_window_ms: 100,
            purchase_window_ms: 200,
            ..TransactionConfig::default()
        };
        let windows = MarketWindows::from(&config);
        assert_eq!(windows.list, Duration::from_millis(100));
        assert_eq!(windows.purchase, Duration::from_millis(200));
    }
}
