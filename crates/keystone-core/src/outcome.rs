//! Transaction outcomes and business rejection reasons.
//!
//! A domain transaction ends in exactly one of three ways:
//!
//! | Outcome | Meaning | Retried? |
//! |---------|---------|----------|
//! | [`TxOutcome::Committed`] | The batch was applied atomically | -- |
//! | [`TxOutcome::Rejected`] | A business rule failed on a consistent read | Never |
//! | [`TxOutcome::TimedOut`] | Conflicts persisted until the deadline | Caller's choice |
//!
//! Store I/O failures are reported separately, as `Err(StoreError)`.

use std::fmt;

/// Why a transaction body refused to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The seller does not hold the item in inventory.
    NotOwned,
    /// The listing vanished, its price differs from the expected one, or
    /// the buyer cannot afford it.
    StaleOrInsufficientFunds,
    /// A key the transaction needs does not exist.
    NotFound(String),
    /// A listing price was negative.
    InvalidPrice(i64),
    /// An autocomplete prefix contained a character outside `a`..`z`.
    InvalidPrefix(char),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOwned => write!(f, "item not owned by seller"),
            Self::StaleOrInsufficientFunds => {
                write!(f, "listing changed or funds insufficient")
            }
            Self::NotFound(key) => write!(f, "not found: {key}"),
            Self::InvalidPrice(price) => write!(f, "invalid price: {price}"),
            Self::InvalidPrefix(ch) => write!(f, "invalid prefix character: {ch:?}"),
        }
    }
}

/// Final outcome of a coordinated transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome<T> {
    /// All writes were applied atomically.
    Committed(T),
    /// The body aborted on a business rule.
    Rejected(RejectReason),
    /// The deadline passed while attempts kept conflicting.
    TimedOut,
}

impl<T> TxOutcome<T> {
    /// Whether the transaction committed.
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    /// The rejection reason, if the transaction was rejected.
    pub const fn rejection(&self) -> Option<&RejectReason> {
        match self {
            Self::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    /// Take the committed value, if any.
    pub fn committed(self) -> Option<T> {
        match self {
            Self::Committed(value) => Some(value),
            _ => None,
        }
    }

    /// Transform the committed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TxOutcome<U> {
        match self {
            Self::Committed(value) => TxOutcome::Committed(f(value)),
            Self::Rejected(reason) => TxOutcome::Rejected(reason),
            Self::TimedOut => TxOutcome::TimedOut,
        }
    }

    /// A short label for logging.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Committed(_) => "committed",
            Self::Rejected(_) => "rejected",
            Self::TimedOut => "timed_out",
        }
    }
}
