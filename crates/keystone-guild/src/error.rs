//! Error types for guild membership.

use keystone_store::StoreError;

/// Errors from guild membership changes.
#[derive(Debug, thiserror::Error)]
pub enum GuildError {
    /// Member names are restricted to `a`..`z`.
    #[error("invalid member name {0:?}: only a-z allowed")]
    InvalidName(String),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
