//! Layered INI configuration loader.
//!
//! Parsing is a two-pass process: [`ast`] builds an immutable raw AST by
//! merging a distribution file, an optional user-override file, and a
//! profile file (each following its own `[base] includes` chain); [`resolve`]
//! then lazily interpolates `%(name)s` references and expands `${VAR}`/`$VAR`
//! placeholders into a flat [`ResolvedProfile`].

mod ast;
mod resolve;

use std::path::Path;

pub use ast::Ast;
pub use resolve::{Placeholders, ResolvedProfile};

use crate::Result;

/// Loads a container's effective configuration: the distribution defaults,
/// an optional per-user override file, and the selected profile, in that
/// order — later files win per key, matching `Load order` in this module's
/// design.
pub fn load_profile(
    distro_ini: &Path,
    overrides: Option<&Path>,
    profile_ini: &Path,
    placeholders: &Placeholders,
) -> Result<ResolvedProfile> {
    let mut tree = Ast::new();
    ast::merge_file(&mut tree, distro_ini)?;
    if let Some(path) = overrides {
        ast::merge_file(&mut tree, path)?;
    }
    ast::merge_file(&mut tree, profile_ini)?;
    resolve::resolve(&tree, placeholders)
}

/// Reads a single file (with its own include chain) without layering on top
/// of anything else. Used for standalone files such as the per-distribution
/// `pkgmgr` template table.
pub fn load_file(path: &Path, placeholders: &Placeholders) -> Result<ResolvedProfile> {
    let mut tree = Ast::new();
    ast::merge_file(&mut tree, path)?;
    resolve::resolve(&tree, placeholders)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::TestDir;

    #[test_log::test]
    fn layers_distro_override_and_profile() {
        let dir = TestDir::new();
        let distro = dir.path().join("distro.ini");
        std::fs::write(&distro, "[base]\nimage = archlinux:latest\n\n[pkgmgr]\ninstall = pacman -S {quiet}\n").unwrap();

        let overrides = dir.path().join("overrides.ini");
        std::fs::write(&overrides, "[base]\nimage = archlinux:custom\n").unwrap();

        let profile = dir.path().join("basic.ini");
        std::fs::write(&profile, "[base]\nname = c1\n\n[mounts]\nhome = ${TARGET_HOME}:/home/c1\n").unwrap();

        let mut placeholders = Placeholders::new();
        placeholders.set("TARGET_HOME", "/home/alice");

        let resolved =
            load_profile(&distro, Some(&overrides), &profile, &placeholders).unwrap();
        assert_eq!(resolved["base"]["image"], "archlinux:custom");
        assert_eq!(resolved["base"]["name"], "c1");
        assert_eq!(resolved["mounts"]["home"], "/home/alice:/home/c1");
    }
}
