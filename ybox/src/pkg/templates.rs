//! The `[pkgmgr]` template table: one parametrized command per package
//! operation, shared by every distribution and rendered into an argv vector
//! for the engine adapter's `exec`.

use std::collections::BTreeMap;

use crate::config::ResolvedProfile;
use crate::{Error, Result};

/// Names of the templates a distribution INI is expected to provide. Not all
/// are required for every operation; callers ask for the one they need and
/// get a clear error if it's missing.
pub const TEMPLATE_NAMES: &[&str] = &[
    "install", "uninstall", "info", "list", "list_all", "list_long", "list_all_long",
    "list_files", "search", "search_all", "info_all", "check_avail", "check_install",
    "opt_deps", "update", "update_all", "update_meta", "clean", "orphans", "mark_explicit",
    "repair", "repair_all", "processes_pattern", "locks_pattern",
];

#[derive(Debug, Clone, Default)]
pub struct Templates {
    raw: BTreeMap<String, String>,
}

impl Templates {
    /// Reads the `[pkgmgr]` section of a resolved distribution profile. Flag
    /// placeholders such as `{quiet}` are expected to be keys in the same
    /// section (e.g. `quiet = --noconfirm`).
    pub fn from_resolved(resolved: &ResolvedProfile) -> Self {
        let raw = resolved.get("pkgmgr").cloned().unwrap_or_default();
        Self { raw }
    }

    fn template(&self, name: &str) -> Result<&str> {
        self.raw
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::ConfigError(format!("[pkgmgr] is missing template {name:?}")))
    }

    /// Renders `name` into an argv vector, substituting `{placeholder}`
    /// occurrences first from `vars`, then from the `[pkgmgr]` section
    /// itself (the flag values), leaving anything still unresolved as
    /// literal text so an optional flag a distribution doesn't define simply
    /// disappears as an empty token rather than failing the render.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<Vec<String>> {
        let mut text = self.template(name)?.to_owned();
        for (key, value) in vars {
            text = text.replace(&format!("{{{key}}}"), value);
        }
        for (key, value) in &self.raw {
            text = text.replace(&format!("{{{key}}}"), value);
        }
        shell_words::split(&text)
            .map_err(|e| Error::ConfigError(format!("invalid template {name:?}: {e}")))
    }

    pub fn has(&self, name: &str) -> bool {
        self.raw.contains_key(name)
    }
}

/// One row of `opt_deps` template output: `{prefix}<name><sep><level><sep><installed><sep><description>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptDep {
    pub name: String,
    pub level: u8,
    pub installed: bool,
    pub description: String,
}

/// Parses `opt_deps` stdout, skipping a leading header line and any line not
/// starting with `prefix`.
pub fn parse_opt_deps(stdout: &str, prefix: &str, separator: &str) -> Vec<OptDep> {
    stdout
        .lines()
        .skip(1)
        .filter_map(|line| {
            let rest = line.strip_prefix(prefix)?;
            let mut fields = rest.splitn(4, separator);
            let name = fields.next()?.trim().to_owned();
            let level: u8 = fields.next()?.trim().parse().ok()?;
            let installed = fields.next()?.trim().eq_ignore_ascii_case("true");
            let description = fields.next().unwrap_or("").trim().to_owned();
            Some(OptDep {
                name,
                level,
                installed,
                description,
            })
        })
        .collect()
}
