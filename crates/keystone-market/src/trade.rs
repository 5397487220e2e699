//! Transaction bodies for listing and purchasing.
//!
//! Both are pure validate-then-write bodies; the coordinator supplies the
//! watch, retry and deadline handling.

use keystone_core::{Plan, RejectReason, Transaction};
use keystone_store::{KeyReader, Op, Reply, StoreError, VersionedStore, WriteBatch};

use crate::keys::{self, FUNDS_FIELD, MARKET};

/// Move `item` from the seller's inventory onto the market at `price`.
#[derive(Debug, Clone)]
pub struct ListItem {
    /// Item id.
    pub item: String,
    /// Seller id.
    pub seller: String,
    /// Asking price, already checked non-negative.
    pub price: i64,
}

impl<S: VersionedStore> Transaction<S> for ListItem {
    type Output = ();

    fn name(&self) -> &'static str {
        "list_item"
    }

    fn watch_keys(&self) -> Vec<String> {
        vec![keys::inventory(&self.seller)]
    }

    async fn plan(&mut self, txn: &S::Txn) -> Result<Plan, StoreError> {
        let inventory = keys::inventory(&self.seller);
        if !txn.sismember(&inventory, &self.item).await? {
            return Ok(Plan::Abort(RejectReason::NotOwned));
        }
        Ok(Plan::Commit(
            WriteBatch::new()
                .with(Op::ZAdd {
                    key: MARKET.to_owned(),
                    member: keys::listing(&self.item, &self.seller),
                    score: price_score(self.price),
                })
                .with(Op::SRem {
                    key: inventory,
                    member: self.item.clone(),
                }),
        ))
    }

    fn finish(self, _replies: Vec<Reply>) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Result of a committed purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Purchase {
    /// Price paid.
    pub price: i64,
    /// Buyer's funds after the debit.
    pub buyer_funds: i64,
    /// Seller's funds after the credit.
    pub seller_funds: i64,
}

/// Buy `item` from `seller` iff it is still listed at `expected_price` and
/// the buyer can afford it.
#[derive(Debug, Clone)]
pub struct PurchaseItem {
    /// Buyer id.
    pub buyer: String,
    /// Item id.
    pub item: String,
    /// Seller id.
    pub seller: String,
    /// Price the buyer saw when deciding to buy.
    pub expected_price: i64,
    price: i64,
}

impl PurchaseItem {
    /// Create a purchase body.
    pub fn new(buyer: &str, item: &str, seller: &str, expected_price: i64) -> Self {
        Self {
            buyer: buyer.to_owned(),
            item: item.to_owned(),
            seller: seller.to_owned(),
            expected_price,
            price: 0,
        }
    }
}

impl<S: VersionedStore> Transaction<S> for PurchaseItem {
    type Output = Purchase;

    fn name(&self) -> &'static str {
        "purchase_item"
    }

    fn watch_keys(&self) -> Vec<String> {
        vec![MARKET.to_owned(), keys::account(&self.buyer)]
    }

    async fn plan(&mut self, txn: &S::Txn) -> Result<Plan, StoreError> {
        let listing = keys::listing(&self.item, &self.seller);
        let buyer_account = keys::account(&self.buyer);

        let score = txn.zscore(MARKET, &listing).await?;
        let Some(raw_funds) = txn.hget(&buyer_account, FUNDS_FIELD).await? else {
            return Ok(Plan::Abort(RejectReason::NotFound(buyer_account)));
        };
        let funds = parse_funds(&buyer_account, &raw_funds)?;

        let Some(score) = score.filter(|&score| score_matches(score, self.expected_price)) else {
            return Ok(Plan::Abort(RejectReason::StaleOrInsufficientFunds));
        };
        let price = truncate_price(score);
        if price > funds {
            return Ok(Plan::Abort(RejectReason::StaleOrInsufficientFunds));
        }
        self.price = price;

        Ok(Plan::Commit(
            WriteBatch::new()
                .with(Op::HIncrBy {
                    key: keys::account(&self.seller),
                    field: FUNDS_FIELD.to_owned(),
                    delta: price,
                })
                .with(Op::HIncrBy {
                    key: buyer_account,
                    field: FUNDS_FIELD.to_owned(),
                    delta: price.saturating_neg(),
                })
                .with(Op::SAdd {
                    key: keys::inventory(&self.buyer),
                    member: self.item.clone(),
                })
                .with(Op::ZRem {
                    key: MARKET.to_owned(),
                    members: vec![listing],
                }),
        ))
    }

    fn finish(self, replies: Vec<Reply>) -> Result<Purchase, StoreError> {
        let int_at = |index: usize| {
            replies
                .get(index)
                .and_then(Reply::as_int)
                .ok_or_else(|| StoreError::UnexpectedReply(format!("missing HINCRBY reply {index}")))
        };
        Ok(Purchase {
            price: self.price,
            seller_funds: int_at(0)?,
            buyer_funds: int_at(1)?,
        })
    }
}

/// Parse a `funds` hash field.
pub(crate) fn parse_funds(key: &str, raw: &str) -> Result<i64, StoreError> {
    raw.parse().map_err(|e| StoreError::Malformed {
        key: key.to_owned(),
        detail: format!("funds {raw:?}: {e}"),
    })
}

/// Market score for an integer price.
#[allow(clippy::cast_precision_loss)]
fn price_score(price: i64) -> f64 {
    price as f64
}

/// Whether a listing's score is exactly the price the buyer agreed to.
#[allow(clippy::float_cmp)]
fn score_matches(score: f64, expected_price: i64) -> bool {
    score == price_score(expected_price)
}

/// Integer price for a market score, truncating any fraction.
#[allow(clippy::cast_possible_truncation)]
fn truncate_price(score: f64) -> i64 {
    score.trunc() as i64
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn fractional_scores_truncate() {
        assert_eq!(truncate_price(10.0), 10);
        assert_eq!(truncate_price(10.9), 10);
        assert_eq!(truncate_price(-0.5), 0);
    }

    #[test]
    fn fractional_scores_never_match_an_integer_price() {
        assert!(score_matches(10.0, 10));
        assert!(!score_matches(10.5, 10));
        assert!(!score_matches(9.99, 10));
    }

    #[test]
    fn funds_must_be_integers() {
        assert_eq!(parse_funds("account:1", "15").unwrap(), 15);
        assert!(matches!(
            parse_funds("account:1", "lots"),
            Err(StoreError::Malformed { .. })
        ));
    }
}
