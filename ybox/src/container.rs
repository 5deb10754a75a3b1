//! Container lifecycle: ties the profile compiler, engine adapter, shared-root
//! manager, and state store together into `create`/`start`/`stop`/`destroy`.
//!
//! A [`Container`] is a thin, stateless handle — `name` plus the paths it owns
//! under the data directory — not a cached view of the database row. Every
//! operation re-reads the row it needs from the [`Store`] it's given.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use log::{info, warn};

use crate::config::ResolvedProfile;
use crate::engine::Engine;
use crate::profile::{self, CompileContext};
use crate::sharedroot::SharedRoot;
use crate::state::{ContainerRecord, Store};
use crate::status::{self, Status};
use crate::{Error, Result};

/// Ceiling on how long `create`/`start` wait for the status file to reach
/// `started` before giving up with [`Error::ContainerNotReady`].
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// How long `stop` waits for a graceful shutdown before the engine is asked
/// to force-kill.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// The filesystem locations one container owns under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPaths {
    root: PathBuf,
}

impl ContainerPaths {
    pub fn new(data_dir: &Path, name: &str) -> Self {
        Self {
            root: data_dir.join(name),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn home(&self) -> PathBuf {
        self.root.join("home")
    }

    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn scripts(&self) -> PathBuf {
        self.root.join("scripts")
    }

    pub fn status_file(&self) -> PathBuf {
        self.root.join("status")
    }
}

/// The high-level state of a container, combining the state-store row with a
/// live look at its status file and engine-reported process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Absent,
    Created,
    Running,
    Stopped,
    Destroyed,
}

/// Inputs to [`Container::create`] beyond the container's own name.
pub struct CreateOptions<'a> {
    pub distribution: &'a str,
    pub resolved_profile: &'a ResolvedProfile,
    pub shared_root: Option<&'a SharedRoot>,
    pub user: (u32, u32),
    pub ready_timeout: Duration,
}

impl<'a> CreateOptions<'a> {
    pub fn new(distribution: &'a str, resolved_profile: &'a ResolvedProfile, user: (u32, u32)) -> Self {
        Self {
            distribution,
            resolved_profile,
            shared_root: None,
            user,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

pub struct Container<'a, E: Engine> {
    engine: &'a E,
    name: String,
    paths: ContainerPaths,
}

impl<'a, E: Engine> Container<'a, E> {
    pub fn new(engine: &'a E, data_dir: &Path, name: impl Into<String>) -> Self {
        let name = name.into();
        let paths = ContainerPaths::new(data_dir, &name);
        Self { engine, name, paths }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn paths(&self) -> &ContainerPaths {
        &self.paths
    }

    /// Compiles the profile, creates and starts the engine container, waits
    /// for its first-boot status transition, then records it. On any failure
    /// after the engine container is created, it is torn down again so a
    /// retry starts from a clean slate.
    pub fn create(
        &self,
        store: &mut Store,
        opts: &CreateOptions,
        cancelled: &AtomicBool,
    ) -> Result<()> {
        if store.container(&self.name)?.is_some() {
            return Err(Error::ContainerAlreadyExists(self.name.clone()));
        }

        let home_dir = self.paths.home();
        let scripts_dir = self.paths.scripts();
        std::fs::create_dir_all(&home_dir)?;
        std::fs::create_dir_all(self.paths.logs())?;
        std::fs::create_dir_all(&scripts_dir)?;

        let ctx = CompileContext {
            container_name: &self.name,
            home_dir: &home_dir,
            scripts_dir: &scripts_dir,
            shared_root: opts.shared_root.map(SharedRoot::path),
            user: opts.user,
        };
        let compiled = profile::compile(opts.resolved_profile, &ctx)?;

        let _shared_guard = match opts.shared_root {
            Some(sr) => Some(sr.lock(cancelled)?),
            None => None,
        };

        info!("creating container {}", self.name);
        if let Err(e) = self.engine.create(&compiled.spec) {
            return Err(e);
        }
        if let Err(e) = self.engine.start(&self.name) {
            let _ = self.engine.rm(&self.name);
            return Err(e);
        }

        if let Err(e) = status::wait_for_status(
            &self.paths.status_file(),
            Status::Started,
            opts.ready_timeout,
            cancelled,
        ) {
            warn!("{} did not become ready, tearing down", self.name);
            let _ = self.engine.stop(&self.name, DEFAULT_STOP_TIMEOUT);
            let _ = self.engine.rm(&self.name);
            return Err(e);
        }

        store.register_container(
            &ContainerRecord {
                name: self.name.clone(),
                distribution: opts.distribution.to_owned(),
                shared_root: opts
                    .shared_root
                    .map(|sr| sr.path().display().to_string())
                    .unwrap_or_default(),
                configuration: render_profile(opts.resolved_profile),
                destroyed: false,
            },
            cancelled,
        )?;

        Ok(())
    }

    pub fn start(&self, cancelled: &AtomicBool) -> Result<()> {
        self.engine.start(&self.name)?;
        status::wait_for_status(
            &self.paths.status_file(),
            Status::Started,
            DEFAULT_READY_TIMEOUT,
            cancelled,
        )
    }

    pub fn stop(&self) -> Result<()> {
        self.engine.stop(&self.name, DEFAULT_STOP_TIMEOUT)
    }

    pub fn restart(&self, cancelled: &AtomicBool) -> Result<()> {
        self.stop()?;
        self.start(cancelled)
    }

    /// Combines the store row, the guest status file, and the engine's own
    /// process listing into one observed state.
    pub fn state(&self, store: &Store) -> Result<ContainerState> {
        let Some(record) = store.container(&self.name)? else {
            return Ok(ContainerState::Absent);
        };
        if record.destroyed {
            return Ok(ContainerState::Destroyed);
        }

        let listed = self.engine.list()?;
        let running = listed
            .iter()
            .any(|entry| entry.name == self.name && entry.status.starts_with("Up"));
        if !running {
            return Ok(ContainerState::Stopped);
        }

        match status::read_status(&self.paths.status_file())? {
            Status::Started => Ok(ContainerState::Running),
            Status::Stopped | Status::Transient => Ok(ContainerState::Created),
        }
    }

    /// Tears down the engine container and removes its row (or, if packages
    /// persist in a shared root, tombstones it per invariant I4/I5). `force`
    /// additionally removes the on-disk HOME/logs/scripts tree.
    pub fn destroy(&self, store: &mut Store, force: bool, cancelled: &AtomicBool) -> Result<()> {
        let record = store
            .container(&self.name)?
            .ok_or_else(|| Error::ContainerNotFound(self.name.clone()))?;

        let _ = self.engine.stop(&self.name, DEFAULT_STOP_TIMEOUT);
        self.engine.rm(&self.name)?;

        let referenced_shared_root = !record.shared_root.is_empty();
        if referenced_shared_root {
            let tombstone = format!(
                "{}.destroyed.{}",
                self.name,
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos()
            );
            store.rename_container(&self.name, &tombstone, cancelled)?;
            store.mark_container_destroyed(&tombstone, cancelled)?;
            store.purge_destroyed_if_unreferenced(&tombstone, cancelled)?;
        } else {
            // No shared root means no other container can reference these
            // packages; drop them outright so the tombstone always purges
            // and the name is free for reuse (P7).
            store.remove_all_packages(&self.name, cancelled)?;
            store.mark_container_destroyed(&self.name, cancelled)?;
            store.purge_destroyed_if_unreferenced(&self.name, cancelled)?;
        }

        if force || !referenced_shared_root {
            match std::fs::remove_dir_all(self.paths.root()) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!("destroyed container {}", self.name);
        Ok(())
    }
}

fn render_profile(resolved: &ResolvedProfile) -> String {
    let mut out = String::new();
    for (section, keys) in resolved {
        out.push_str(&format!("[{section}]\n"));
        for (key, value) in keys {
            out.push_str(&format!("{key} = {value}\n"));
        }
    }
    out
}
