//! Per-site run serialization
//!
//! Webhook providers happily deliver pushes back to back; two overlapping
//! runs against one site root would interleave the maintenance swap and the
//! target directories destructively. An exclusive file lock serializes whole
//! runs: the second delivery blocks until the first finishes.

use std::fs::{self, File};
use std::path::Path;

use fs2::FileExt;

use crate::error::CapstanResult;

/// Exclusive lock held for the duration of one orchestration run.
///
/// Released on drop; the lock file itself is left in place for the next run.
#[derive(Debug)]
pub struct SiteLock {
    file: File,
}

impl SiteLock {
    /// Acquire the lock at `path`, blocking until it is free.
    pub fn acquire(path: &Path) -> CapstanResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for SiteLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
