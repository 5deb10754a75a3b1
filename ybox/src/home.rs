//! Top-level entry point: resolves the XDG data directory this crate
//! persists everything under and hands out the pieces (state store, shared
//! roots, per-container paths) rooted there.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::container::ContainerPaths;
use crate::sharedroot::SharedRoot;
use crate::state::Store;
use crate::{Error, Result};

/// `~/.local/share/ybox` (or equivalent on other platforms), plus whatever
/// `XDG_DATA_HOME` overrides it to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Home {
    data_dir: PathBuf,
}

impl Home {
    /// Resolves the data directory via the `directories` crate's XDG base
    /// directory logic (`ProjectDirs::from("", "", "ybox")`).
    pub fn discover() -> Result<Self> {
        let dirs = ProjectDirs::from("", "", "ybox")
            .ok_or_else(|| Error::ConfigError("could not determine a home directory".to_owned()))?;
        Ok(Self {
            data_dir: dirs.data_dir().to_path_buf(),
        })
    }

    /// Builds a `Home` rooted at an explicit path, bypassing XDG discovery —
    /// used by tests and by callers that honor an explicit override flag.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Opens (creating and migrating if necessary) the state database.
    pub fn state_store(&self) -> Result<Store> {
        Store::open(&self.data_dir)
    }

    pub fn shared_root(&self, distribution: &str) -> SharedRoot {
        SharedRoot::new(&self.data_dir, distribution)
    }

    pub fn container_paths(&self, name: &str) -> ContainerPaths {
        ContainerPaths::new(&self.data_dir, name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::TestDir;

    #[test_log::test]
    fn at_rooted_paths_are_derived_from_the_data_dir() {
        let dir = TestDir::new();
        let home = Home::at(dir.path());
        assert_eq!(home.data_dir(), dir.path());

        let shared = home.shared_root("arch");
        assert_eq!(shared.path(), dir.path().join("SHARED_ROOTS/arch"));

        let paths = home.container_paths("c1");
        assert_eq!(paths.root(), dir.path().join("c1"));
        assert_eq!(paths.home(), dir.path().join("c1/home"));
    }

    #[test_log::test]
    fn state_store_opens_and_migrates_to_current() {
        let dir = TestDir::new();
        let home = Home::at(dir.path());
        let store = home.state_store().unwrap();
        assert_eq!(store.schema_version().unwrap(), crate::state::CURRENT_VERSION);
    }
}
