//! Distribution-agnostic package orchestrator: dispatches `[pkgmgr]`
//! templates inside a container, resolves optional dependencies, records
//! every mutation in the state store, and materializes host wrappers.

pub mod templates;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use log::{info, warn};

use crate::engine::Engine;
use crate::sharedroot::SharedRoot;
use crate::state::{DepType, DependencyRecord, LocalCopyType, PackageFlags, PackageRecord, Store};
use crate::wrapper;
use crate::{Error, Result};

pub use templates::{OptDep, Templates};

/// Directories wrappers are written into, rooted at the invoking user's XDG
/// data directory and `$HOME/.local/bin`.
pub struct WrapperDirs {
    pub applications: PathBuf,
    pub bin: PathBuf,
    pub man: PathBuf,
}

pub struct Orchestrator<'a, E: Engine> {
    pub engine: &'a E,
    pub store: &'a mut Store,
    pub templates: &'a Templates,
    pub container: String,
    pub shared_root: Option<&'a SharedRoot>,
    pub wrapper_dirs: WrapperDirs,
    pub cancelled: &'a AtomicBool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub package: String,
    pub already_installed: bool,
    pub optional_deps_offered: Vec<OptDep>,
}

enum Failure {
    Transient,
    Permanent,
}

fn classify(stderr: &str) -> Failure {
    const TRANSIENT_MARKERS: &[&str] = &[
        "could not lock",
        "unable to lock",
        "db.lck",
        "failed to synchronize",
        "temporary failure",
        "could not resolve host",
    ];
    let lower = stderr.to_ascii_lowercase();
    if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        Failure::Transient
    } else {
        Failure::Permanent
    }
}

impl<'a, E: Engine> Orchestrator<'a, E> {
    fn exec_template(&self, name: &str, vars: &[(&str, &str)]) -> Result<crate::engine::ExecResult> {
        let argv = self.templates.render(name, vars)?;
        self.engine.exec(&self.container, &argv, self.cancelled)
    }

    /// Runs a template directly with no retry classification or state
    /// mutation, for read-only operations (`list`, `search`, `info`,
    /// `update`, `clean`) that callers surface verbatim.
    pub fn run_raw(&self, name: &str, vars: &[(&str, &str)]) -> Result<crate::engine::ExecResult> {
        self.exec_template(name, vars)
    }

    fn check_install(&self, pkg: &str) -> Result<bool> {
        if !self.templates.has("check_install") {
            return Ok(false);
        }
        let result = self.exec_template("check_install", &[("pkg", pkg)])?;
        Ok(result.success())
    }

    /// Kills processes matching `processes_pattern` and removes stale lock
    /// files matching `locks_pattern`, then retries the failed template
    /// once. Used only for a transient-classified failure.
    fn clear_transient_locks(&self) -> Result<()> {
        if self.templates.has("processes_pattern") {
            let _ = self.exec_template("processes_pattern", &[]);
        }
        if self.templates.has("locks_pattern") {
            let _ = self.exec_template("locks_pattern", &[]);
        }
        Ok(())
    }

    fn run_with_retry(&self, name: &str, vars: &[(&str, &str)]) -> Result<()> {
        let result = self.exec_template(name, vars)?;
        if result.success() {
            return Ok(());
        }
        match classify(&result.stderr) {
            Failure::Transient => {
                warn!("{name} failed transiently, retrying once after clearing locks");
                self.clear_transient_locks()?;
                let retry = self.exec_template(name, vars)?;
                if retry.success() {
                    return Ok(());
                }
                Err(Error::PackageOpError(retry.stderr.trim().to_owned()))
            }
            Failure::Permanent => Err(Error::PackageOpError(result.stderr.trim().to_owned())),
        }
    }

    fn opt_deps(&self, pkg: &str) -> Result<Vec<OptDep>> {
        if !self.templates.has("opt_deps") {
            return Ok(Vec::new());
        }
        let result = self.exec_template("opt_deps", &[("pkg", pkg)])?;
        if !result.success() {
            return Ok(Vec::new());
        }
        Ok(templates::parse_opt_deps(&result.stdout, "-", "|"))
    }

    fn materialize_wrappers(&self, pkg: &str) -> Result<(Vec<String>, LocalCopyType)> {
        if !self.templates.has("list_files") {
            return Ok((Vec::new(), LocalCopyType::NONE));
        }
        let result = self.exec_template("list_files", &[("pkg", pkg)])?;
        if !result.success() {
            return Ok((Vec::new(), LocalCopyType::NONE));
        }

        let mut copies = Vec::new();
        let mut mask = 0u8;
        for line in result.stdout.lines() {
            let path = std::path::Path::new(line.trim());
            if path.extension().map(|e| e == "desktop").unwrap_or(false) {
                let dest = wrapper::rewrite_desktop_file(
                    path,
                    &self.wrapper_dirs.applications,
                    &self.container,
                    &[],
                )?;
                copies.push(dest.display().to_string());
                mask |= 1;
            } else if path.starts_with("/usr/bin") || path.starts_with("/usr/local/bin") {
                if let Some(exe) = path.file_name().and_then(|n| n.to_str()) {
                    let dest =
                        wrapper::write_exec_shim(exe, &self.container, &self.wrapper_dirs.bin, &[])?;
                    copies.push(dest.display().to_string());
                    mask |= 2;
                }
            } else if path.starts_with("/usr/share/man") {
                let dest = wrapper::link_man_page(path, &self.wrapper_dirs.man)?;
                copies.push(dest.display().to_string());
            }
        }
        Ok((copies, LocalCopyType(mask)))
    }

    /// Installs `pkg`, optionally pulling in `with_opt_deps` (by name) from
    /// the level-1/level-2 set the `opt_deps` template reports.
    pub fn install(&mut self, pkg: &str, with_opt_deps: &[String]) -> Result<InstallOutcome> {
        let _txn = self.store.begin_transaction(self.cancelled)?;
        let _shared_guard = match self.shared_root {
            Some(sr) => Some(sr.lock(self.cancelled)?),
            None => None,
        };

        if self.check_install(pkg)? {
            return Ok(InstallOutcome {
                package: pkg.to_owned(),
                already_installed: true,
                optional_deps_offered: Vec::new(),
            });
        }

        self.run_with_retry("install", &[("pkg", pkg)])?;

        let offered = self.opt_deps(pkg)?;
        for dep in offered.iter().filter(|d| d.level <= 2) {
            if with_opt_deps.iter().any(|name| name == &dep.name) {
                self.install_dependency(pkg, &dep.name)?;
            }
        }

        let (local_copies, local_copy_type) = self.materialize_wrappers(pkg)?;
        self.store.record_package(
            &PackageRecord {
                name: pkg.to_owned(),
                container: self.container.clone(),
                local_copies,
                local_copy_type,
                flags: PackageFlags::new(),
                explicit: true,
            },
            self.cancelled,
        )?;

        info!("installed {pkg} in {}", self.container);
        Ok(InstallOutcome {
            package: pkg.to_owned(),
            already_installed: false,
            optional_deps_offered: offered,
        })
    }

    fn install_dependency(&mut self, parent: &str, dep: &str) -> Result<()> {
        if self.store.package(dep, &self.container)?.is_none() {
            self.run_with_retry("install", &[("pkg", dep)])?;
            let (local_copies, local_copy_type) = self.materialize_wrappers(dep)?;
            self.store.record_package(
                &PackageRecord {
                    name: dep.to_owned(),
                    container: self.container.clone(),
                    local_copies,
                    local_copy_type,
                    flags: PackageFlags::new(),
                    explicit: false,
                },
                self.cancelled,
            )?;
        }
        self.store.add_dependency(
            &DependencyRecord {
                name: parent.to_owned(),
                container: self.container.clone(),
                dependency: dep.to_owned(),
                dep_type: DepType::Optional,
            },
            self.cancelled,
        )
    }

    /// Uninstalls `pkg`: removes wrapper files, runs the `uninstall`
    /// template, then recursively removes any dependency whose reference
    /// count reaches zero (unless `keep_deps`).
    pub fn uninstall(&mut self, pkg: &str, purge: bool, keep_deps: bool) -> Result<()> {
        let _txn = self.store.begin_transaction(self.cancelled)?;
        let _shared_guard = match self.shared_root {
            Some(sr) => Some(sr.lock(self.cancelled)?),
            None => None,
        };

        let record = self
            .store
            .package(pkg, &self.container)?
            .ok_or_else(|| Error::PackageNotInstalled(pkg.to_owned()))?;

        for path in &record.local_copies {
            wrapper::remove_wrapper(std::path::Path::new(path))?;
        }

        let remove_deps = !keep_deps;
        self.run_with_retry(
            "uninstall",
            &[
                ("pkg", pkg),
                ("purge", if purge { "--nosave" } else { "" }),
                ("remove_deps", if remove_deps { "--recursive" } else { "" }),
            ],
        )?;

        let deps = self.store.dependencies_of(pkg, &self.container)?;
        self.store.remove_package(pkg, &self.container, self.cancelled)?;

        if !keep_deps {
            for dep in deps {
                self.store.remove_dependency(
                    pkg,
                    &self.container,
                    &dep.dependency,
                    self.cancelled,
                )?;
                let refcount = self.store.dependency_refcount(&self.container, &dep.dependency)?;
                if refcount == 0 {
                    if let Some(dep_record) = self.store.package(&dep.dependency, &self.container)? {
                        if !dep_record.explicit {
                            self.uninstall(&dep.dependency, purge, keep_deps)?;
                        }
                    }
                }
            }
        }

        info!("uninstalled {pkg} from {}", self.container);
        Ok(())
    }

    /// Light repair for one package: re-run the `repair` template and, if it
    /// previously had wrappers, regenerate them.
    pub fn repair(&mut self, pkg: &str) -> Result<()> {
        let _txn = self.store.begin_transaction(self.cancelled)?;
        self.run_with_retry("repair", &[("pkg", pkg)])?;
        if let Some(mut record) = self.store.package(pkg, &self.container)? {
            if record.local_copy_type.0 != 0 {
                let (local_copies, local_copy_type) = self.materialize_wrappers(pkg)?;
                record.local_copies = local_copies;
                record.local_copy_type = local_copy_type;
                self.store.record_package(&record, self.cancelled)?;
            }
        }
        Ok(())
    }

    /// Reinstalls every tracked package, preserving its explicit/auto flag,
    /// then regenerates wrappers for packages that had any.
    pub fn repair_all(&mut self) -> Result<()> {
        let _txn = self.store.begin_transaction(self.cancelled)?;
        self.run_with_retry("repair_all", &[])?;
        for record in self.store.list_packages(&self.container)? {
            if record.local_copy_type.0 != 0 {
                let (local_copies, local_copy_type) = self.materialize_wrappers(&record.name)?;
                let mut updated = record;
                updated.local_copies = local_copies;
                updated.local_copy_type = local_copy_type;
                self.store.record_package(&updated, self.cancelled)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::state::ContainerRecord;
    use crate::test::TestDir;
    use std::collections::BTreeMap;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn templates_with(entries: &[(&str, &str)]) -> Templates {
        let mut resolved = crate::config::ResolvedProfile::new();
        let mut section = BTreeMap::new();
        for (k, v) in entries {
            section.insert(k.to_string(), v.to_string());
        }
        resolved.insert("pkgmgr".to_owned(), section);
        Templates::from_resolved(&resolved)
    }

    fn wrapper_dirs(dir: &TestDir) -> WrapperDirs {
        WrapperDirs {
            applications: dir.path().join("applications"),
            bin: dir.path().join("bin"),
            man: dir.path().join("man"),
        }
    }

    #[test_log::test]
    fn install_records_package_and_skips_when_already_installed() {
        let dir = TestDir::new();
        let engine = FakeEngine::new();
        engine.script_exec(&["pacman", "-Qi", "firefox"], "installed\n");

        let templates = templates_with(&[
            ("install", "pacman -S {pkg}"),
            ("check_install", "pacman -Qi {pkg}"),
        ]);
        let mut store = Store::open_in_memory().unwrap();
        let cancelled = AtomicBool::new(false);
        store
            .register_container(
                &ContainerRecord {
                    name: "c1".to_owned(),
                    distribution: "arch".to_owned(),
                    shared_root: String::new(),
                    configuration: String::new(),
                    destroyed: false,
                },
                &cancelled,
            )
            .unwrap();

        let mut orch = Orchestrator {
            engine: &engine,
            store: &mut store,
            templates: &templates,
            container: "c1".to_owned(),
            shared_root: None,
            wrapper_dirs: wrapper_dirs(&dir),
            cancelled: &cancelled,
        };

        let outcome = orch.install("firefox", &[]).unwrap();
        assert!(outcome.already_installed);
    }

    #[test_log::test]
    fn install_retries_transient_failure_then_succeeds() {
        let dir = TestDir::new();
        let engine = FakeEngine::new();
        // check_install reports not installed (nonzero exit -> default fake success, so
        // override with an explicit failing response).
        engine.exec_responses.lock().unwrap().insert(
            "pacman -Qi firefox".to_owned(),
            crate::engine::ExecResult {
                status: ExitStatus::from_raw(256),
                stdout: String::new(),
                stderr: String::new(),
            },
        );

        let templates = templates_with(&[
            ("install", "pacman -S {pkg}"),
            ("check_install", "pacman -Qi {pkg}"),
        ]);
        let mut store = Store::open_in_memory().unwrap();
        let cancelled = AtomicBool::new(false);
        store
            .register_container(
                &ContainerRecord {
                    name: "c1".to_owned(),
                    distribution: "arch".to_owned(),
                    shared_root: String::new(),
                    configuration: String::new(),
                    destroyed: false,
                },
                &cancelled,
            )
            .unwrap();

        let mut orch = Orchestrator {
            engine: &engine,
            store: &mut store,
            templates: &templates,
            container: "c1".to_owned(),
            shared_root: None,
            wrapper_dirs: wrapper_dirs(&dir),
            cancelled: &cancelled,
        };

        let outcome = orch.install("firefox", &[]).unwrap();
        assert!(!outcome.already_installed);
        assert_eq!(store.package("firefox", "c1").unwrap().unwrap().name, "firefox");
    }

    #[test_log::test]
    fn uninstall_removes_package_row() {
        let dir = TestDir::new();
        let engine = FakeEngine::new();
        let templates = templates_with(&[("uninstall", "pacman -R {pkg}")]);
        let mut store = Store::open_in_memory().unwrap();
        let cancelled = AtomicBool::new(false);
        store
            .register_container(
                &ContainerRecord {
                    name: "c1".to_owned(),
                    distribution: "arch".to_owned(),
                    shared_root: String::new(),
                    configuration: String::new(),
                    destroyed: false,
                },
                &cancelled,
            )
            .unwrap();
        store
            .record_package(
                &PackageRecord {
                    name: "firefox".to_owned(),
                    container: "c1".to_owned(),
                    local_copies: vec![],
                    local_copy_type: LocalCopyType::NONE,
                    flags: PackageFlags::new(),
                    explicit: true,
                },
                &cancelled,
            )
            .unwrap();

        let mut orch = Orchestrator {
            engine: &engine,
            store: &mut store,
            templates: &templates,
            container: "c1".to_owned(),
            shared_root: None,
            wrapper_dirs: wrapper_dirs(&dir),
            cancelled: &cancelled,
        };

        orch.uninstall("firefox", false, true).unwrap();
        assert!(store.package("firefox", "c1").unwrap().is_none());
    }

    #[test_log::test]
    fn classify_recognizes_transient_lock_failures() {
        assert!(matches!(classify("error: could not lock database"), Failure::Transient));
        assert!(matches!(classify("error: target not found: bogus"), Failure::Permanent));
    }
}
