//! Atomic marketplace trades for Keystone.
//!
//! Sellers list items from their inventory onto a shared market; buyers
//! purchase a listing at the price they saw. Both operations run through
//! the optimistic [`TransactionCoordinator`](keystone_core::TransactionCoordinator),
//! so funds and inventory move together or not at all.
//!
//! # Invariants
//!
//! - A listed item is in `market:` and absent from its seller's inventory;
//!   no reader sees it in both or neither.
//! - A committed purchase debits the buyer and credits the seller by the
//!   same amount.
//! - Concurrent purchases of one listing commit at most once.
//!
//! # Modules
//!
//! - [`keys`] -- key layout.
//! - [`trade`] -- [`ListItem`] and [`PurchaseItem`] transaction bodies.
//! - [`marketplace`] -- the [`Marketplace`] entry points.

pub mod keys;
pub mod marketplace;
pub mod trade;

pub use marketplace::{MarketWindows, Marketplace};
pub use trade::{ListItem, Purchase, PurchaseItem};
