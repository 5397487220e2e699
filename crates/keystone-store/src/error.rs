//! Error types for the store layer.
//!
//! All backends report failures through [`StoreError`]. A watch conflict is
//! not an error: it is reported as [`CommitOutcome::Conflict`] so that the
//! coordinator can retry without inspecting error variants.
//!
//! [`CommitOutcome::Conflict`]: crate::CommitOutcome::Conflict

/// Errors that can occur while talking to a store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// The operation targeted a key holding a different value type.
    #[error("wrong type for key {key}: expected {expected}")]
    WrongType {
        /// The offending key.
        key: String,
        /// The value type the operation needed.
        expected: &'static str,
    },

    /// A rename (or similar) required a key that does not exist.
    #[error("no such key: {0}")]
    NoSuchKey(String),

    /// A stored value could not be parsed into the expected shape.
    #[error("malformed value at {key}: {detail}")]
    Malformed {
        /// The key holding the malformed value.
        key: String,
        /// What was wrong with it.
        detail: String,
    },

    /// A backend returned a reply that does not match the issued command.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// The watch connection pool was shut down.
    #[error("watch connection pool closed")]
    WatchPoolClosed,

    /// A configuration error (bad URL, bad pool size).
    #[error("configuration error: {0}")]
    Config(String),
}
