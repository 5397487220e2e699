//! Row source backed by a directory of JSON files.
//!
//! Row `42` is read from `<dir>/42.json`. Ids that could escape the
//! directory are treated as missing.
//!
//! Sweepers call [`RowSource::load`] from async tasks, so on a
//! multi-threaded runtime the file read runs under
//! [`tokio::task::block_in_place`] instead of stalling a worker.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::warn;

use keystone_sweeper::RowSource;

/// Loads cacheable rows from JSON files.
#[derive(Debug, Clone, Default)]
pub struct RowFiles {
    dir: Option<PathBuf>,
}

impl RowFiles {
    /// Read rows from `dir`. With `None` no row is ever found.
    pub const fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }
}

fn is_plain_id(row_id: &str) -> bool {
    !row_id.is_empty()
        && !row_id.starts_with('.')
        && row_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Read `path`, moving the blocking call off the async worker when the
/// current runtime allows it.
fn read_row(path: &Path) -> std::io::Result<String> {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => {
            tokio::task::block_in_place(|| std::fs::read_to_string(path))
        }
        _ => std::fs::read_to_string(path),
    }
}

impl RowSource for RowFiles {
    fn load(&self, row_id: &str) -> Option<Value> {
        let dir = self.dir.as_ref()?;
        if !is_plain_id(row_id) {
            warn!(row = row_id, "refusing to load row with unsafe id");
            return None;
        }
        let path = dir.join(format!("{row_id}.json"));
        let raw = match read_row(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read row");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "row is not valid JSON");
                None
            }
        }
    }
}
