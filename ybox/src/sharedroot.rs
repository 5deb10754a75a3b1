//! Shared-root lifecycle: copy-on-first-use directory trees shared by every
//! container of one distribution, coordinated by a per-root file lock.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use log::info;

use crate::lock::FileLock;
use crate::Result;

/// Default directories copied into and bind-mounted from a shared root when
/// a profile doesn't list its own `shared_root_dirs`.
pub const DEFAULT_SHARED_DIRS: &[&str] = &["usr", "etc", "opt", "var"];

/// Ceiling on how long a caller waits for the shared-root lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Manages `<data>/SHARED_ROOTS/<distribution>` for one distribution.
pub struct SharedRoot {
    root: PathBuf,
    lock_path: PathBuf,
}

impl SharedRoot {
    pub fn new(data_dir: &Path, distribution: &str) -> Self {
        let root = data_dir.join("SHARED_ROOTS").join(distribution);
        let lock_path = data_dir.join("SHARED_ROOTS").join(format!("{distribution}.lock"));
        Self { root, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Whether this distribution's shared root has ever been populated.
    pub fn is_bootstrapped(&self) -> bool {
        DEFAULT_SHARED_DIRS
            .iter()
            .any(|dir| self.root.join(dir).is_dir())
    }

    pub fn lock(&self, cancelled: &AtomicBool) -> Result<FileLock> {
        FileLock::acquire_exclusive(&self.lock_path, LOCK_TIMEOUT, cancelled)
    }

    /// Creates the directory skeleton (writable) for the first container's
    /// bootstrap boot. Idempotent.
    pub fn prepare_writable(&self, dirs: &[String]) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        for dir in dirs {
            std::fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    /// Copies the populated directories from a secondary bind-mounted staging
    /// path back into the shared-root tree after `init.sh` completes, then
    /// marks the tree read-only-eligible for subsequent containers.
    pub fn absorb_bootstrap(&self, staged_from: &Path, dirs: &[String]) -> Result<()> {
        for dir in dirs {
            let src = staged_from.join(dir);
            let dst = self.root.join(dir);
            if !src.exists() {
                continue;
            }
            info!("absorbing bootstrap output for {dir} into shared root");
            copy_tree(&src, &dst)?;
        }
        Ok(())
    }

    /// Deletes the shared-root tree entirely. Callers must ensure no live
    /// container references it (invariant I4) before calling this.
    pub fn destroy(&self) -> Result<()> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::TestDir;

    #[test_log::test]
    fn fresh_distribution_is_not_bootstrapped() {
        let dir = TestDir::new();
        let shared = SharedRoot::new(dir.path(), "arch");
        assert!(!shared.is_bootstrapped());
    }

    #[test_log::test]
    fn prepare_then_absorb_populates_shared_root() {
        let dir = TestDir::new();
        let shared = SharedRoot::new(dir.path(), "arch");
        let dirs = vec!["usr".to_owned(), "etc".to_owned()];
        shared.prepare_writable(&dirs).unwrap();

        let staging = dir.path().join("staging");
        std::fs::create_dir_all(staging.join("usr/bin")).unwrap();
        std::fs::write(staging.join("usr/bin/vim"), b"binary").unwrap();

        shared.absorb_bootstrap(&staging, &dirs).unwrap();
        assert!(shared.path().join("usr/bin/vim").exists());
        assert!(shared.is_bootstrapped());
    }

    #[test_log::test]
    fn lock_is_exclusive_across_handles() {
        let dir = TestDir::new();
        let shared = SharedRoot::new(dir.path(), "arch");
        let cancelled = AtomicBool::new(false);
        let _held = shared.lock(&cancelled).unwrap();

        let other = std::fs::File::options()
            .read(true)
            .write(true)
            .open(&shared.lock_path)
            .unwrap();
        assert!(fs3::FileExt::try_lock_exclusive(&other).is_err());
    }

    #[test_log::test]
    fn destroy_removes_the_tree() {
        let dir = TestDir::new();
        let shared = SharedRoot::new(dir.path(), "arch");
        shared.prepare_writable(&["usr".to_owned()]).unwrap();
        assert!(shared.path().exists());
        shared.destroy().unwrap();
        assert!(!shared.path().exists());
    }
}
