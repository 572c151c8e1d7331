//! Cross-process exclusion for the local `.vellum/` store.
//!
//! One advisory lock file guards the whole directory. `fs2` maps it to
//! `flock(2)` on Unix and `LockFileEx` on Windows, so the lock is released by
//! the OS if the holder dies.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::{debug, trace};

use crate::error::ErrorCode;

/// How long a store operation waits for another `vl` process.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("timed out after {waited:?} waiting for store lock {}", path.display())]
    Timeout { path: PathBuf, waited: Duration },

    #[error("store lock I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LockError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout { .. } => ErrorCode::LockContention,
            Self::Io(_) => ErrorCode::StoreWriteFailed,
        }
    }
}

/// Exclusive lock on a store directory, held until dropped.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Take the lock at `path`, creating the file (and its directory) if
    /// needed, polling until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// [`LockError::Timeout`] while another holder keeps the lock, or
    /// [`LockError::Io`] if the lock file cannot be opened.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, LockError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let started = Instant::now();
        let mut attempts = 0_u32;
        while file.try_lock_exclusive().is_err() {
            let waited = started.elapsed();
            if waited >= timeout {
                debug!(path = %path.display(), attempts, "store lock timed out");
                return Err(LockError::Timeout {
                    path: path.to_path_buf(),
                    waited,
                });
            }
            attempts += 1;
            thread::sleep(RETRY_INTERVAL);
        }
        trace!(path = %path.display(), attempts, "store lock acquired");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), "store unlock failed: {err}");
        }
    }
}
