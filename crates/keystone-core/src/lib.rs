//! Optimistic transaction coordination for Keystone.
//!
//! This crate owns the watch/read/decide/commit retry loop every domain
//! operation runs through, plus the ambient pieces the domain crates and
//! the daemon share.
//!
//! # Modules
//!
//! - [`coordinator`] -- [`TransactionCoordinator`], the [`Transaction`]
//!   trait and [`Plan`].
//! - [`outcome`] -- [`TxOutcome`] and [`RejectReason`].
//! - [`config`] -- [`KeystoneConfig`] loaded from file and environment.
//! - [`shutdown`] -- [`StopSignal`] for cooperative loop shutdown.

pub mod config;
pub mod coordinator;
pub mod outcome;
pub mod shutdown;

pub use config::{ConfigError, KeystoneConfig};
pub use coordinator::{Plan, Transaction, TransactionCoordinator};
pub use outcome::{RejectReason, TxOutcome};
pub use shutdown::StopSignal;
