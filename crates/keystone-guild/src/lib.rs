//! Guild membership and prefix autocomplete for Keystone.
//!
//! Member names live in a score-0 sorted set per guild, so the set orders
//! purely lexicographically. [`GuildDirectory::autocomplete_prefix`] finds
//! up to ten names sharing a prefix by inserting two one-time sentinels at
//! the prefix's range bounds and reading the ranks between them inside an
//! optimistic transaction.
//!
//! # Modules
//!
//! - [`prefix`] -- alphabet and range bounds.
//! - [`autocomplete`] -- the [`Autocomplete`] transaction body.
//! - [`directory`] -- the [`GuildDirectory`] entry points.
//! - [`error`] -- [`GuildError`].

pub mod autocomplete;
pub mod directory;
pub mod error;
pub mod prefix;

pub use autocomplete::{Autocomplete, MAX_RESULTS, members_key};
pub use directory::GuildDirectory;
pub use error::GuildError;
pub use prefix::prefix_range;
