//! Session tracking, row caching, and the background sweepers for Keystone.
//!
//! Unlike the transactional domains, sweepers write unconditionally: they
//! only remove sessions that are over the limit or refresh rows that are
//! already due, so repeating a pass is harmless.
//!
//! # Modules
//!
//! - [`session`] -- [`SessionStore`] for tokens, views and carts.
//! - [`row_cache`] -- [`RowCache`] scheduling and the [`RowSource`] trait.
//! - [`page_cache`] -- [`PageCache`], expiring whole-page caching.
//! - [`sweep`] -- one-pass [`sweep_sessions_once`] and
//!   [`sweep_invalidations_once`].
//! - [`scheduler`] -- [`SweeperScheduler`], the cancellable loops.

pub mod clock;
pub mod page_cache;
pub mod row_cache;
pub mod scheduler;
pub mod session;
pub mod sweep;

pub use page_cache::PageCache;
pub use row_cache::{RowCache, RowSource};
pub use scheduler::SweeperScheduler;
pub use session::SessionStore;
pub use sweep::{SweepAction, sweep_invalidations_once, sweep_sessions_once};
