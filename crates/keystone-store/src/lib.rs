//! Versioned key-value store contract for optimistic transactions.
//!
//! Every transactional operation in Keystone is expressed against the
//! [`VersionedStore`] trait: watch a set of keys, read through the watch
//! handle, then conditionally commit a [`WriteBatch`]. Two backends are
//! provided:
//!
//! - [`MemoryStore`] -- an in-process versioned keyspace, used by tests and
//!   embedded callers.
//! - [`DragonflyStore`] -- a `Dragonfly`/Redis backend mapping the contract
//!   onto `WATCH`/`MULTI`/`EXEC`.
//!
//! # Modules
//!
//! - [`command`] -- [`Op`], [`Read`] and their replies
//! - [`store`] -- the [`KeyReader`] and [`VersionedStore`] traits
//! - [`memory`] -- [`MemoryStore`]
//! - [`dragonfly`] -- [`DragonflyStore`]
//! - [`error`] -- [`StoreError`]

pub mod command;
pub mod dragonfly;
pub mod error;
pub mod memory;
pub mod store;

// Re-export primary types for convenience.
pub use command::{CommitOutcome, Op, Read, ReadReply, Reply, WriteBatch};
pub use dragonfly::{DragonflyStore, DragonflyTxn};
pub use error::StoreError;
pub use memory::{MemoryStore, MemoryTxn};
pub use store::{KeyReader, VersionedStore};
