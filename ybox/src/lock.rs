//! Cross-process advisory file locking.
//!
//! Every shared mutable resource (the state database, a shared root) is
//! guarded by a sibling `.lock` file. Locks are OS advisory locks taken via
//! `fs3`, held only for the duration of one logical transaction, and released
//! automatically when the guard is dropped.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use fs3::FileExt;

use crate::{Error, Result};

/// Polling interval used while waiting for a contended lock.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An exclusive or shared hold on a `.lock` file, released on drop.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquires an exclusive lock on `path`, creating it if necessary.
    ///
    /// Blocks until the lock is available, `timeout` elapses (returning
    /// [`Error::LockTimeout`]), or `cancelled` flips to `true` (returning
    /// [`Error::Interrupted`]).
    pub fn acquire_exclusive(
        path: impl AsRef<Path>,
        timeout: Duration,
        cancelled: &AtomicBool,
    ) -> Result<Self> {
        Self::acquire(path, timeout, cancelled, true)
    }

    /// Acquires a shared (read) lock on `path`, creating it if necessary.
    pub fn acquire_shared(
        path: impl AsRef<Path>,
        timeout: Duration,
        cancelled: &AtomicBool,
    ) -> Result<Self> {
        Self::acquire(path, timeout, cancelled, false)
    }

    fn acquire(
        path: impl AsRef<Path>,
        timeout: Duration,
        cancelled: &AtomicBool,
        exclusive: bool,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let deadline = Instant::now() + timeout;
        loop {
            let attempt = if exclusive {
                file.try_lock_exclusive()
            } else {
                file.try_lock_shared()
            };
            match attempt {
                Ok(()) => return Ok(Self { file, path }),
                Err(_) => {
                    if cancelled.load(Ordering::SeqCst) {
                        return Err(Error::Interrupted);
                    }
                    if Instant::now() >= deadline {
                        return Err(Error::LockTimeout(path));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
    }

    /// Path to the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unlocks the file early instead of waiting for drop.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
