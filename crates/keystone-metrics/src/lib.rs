//! Hourly rotating message counters for Keystone.
//!
//! [`MetricLog::record_and_maybe_rotate`] counts a message in the current
//! hour's bucket. The first writer to see a new hour renames the bucket to
//! `:last` and starts a fresh one in the same atomic batch as its own
//! increment, so no reader observes a rotated bucket missing the message
//! that triggered the rotation.
//!
//! # Modules
//!
//! - [`severity`] -- [`Severity`] levels.
//! - [`rotation`] -- key layout and the [`RecordMetric`] transaction body.
//! - [`log`] -- the [`MetricLog`] entry points.

pub mod log;
pub mod rotation;
pub mod severity;

pub use log::MetricLog;
pub use rotation::{MetricKeys, RECENT_LIMIT, RecordMetric, Recorded};
pub use severity::{Severity, UnknownSeverity};
