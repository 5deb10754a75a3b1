//! Plumbing shared by every `ybox-*` binary: `.env`/logger bootstrap, Ctrl-C
//! wiring into a shared cancellation flag, XDG config-directory discovery
//! for the bundled distribution/profile INI files, and the exit-code mapping
//! prescribed for the CLI surface.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use ybox::Home;

use crate::logger;

/// Flags every `ybox-*` binary accepts, regardless of its own subcommands.
#[derive(clap::Args, Debug, Clone)]
pub struct CommonOpts {
    /// Only print errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Override the data directory ybox persists containers and state under
    /// (defaults to the XDG data directory).
    #[arg(long, env = "YBOX_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,
}

/// Sources a `.env` file from the current directory if present, installs the
/// process logger, and wires a `ctrlc` handler into a shared cancellation
/// flag consulted at this crate's suspension points (lock acquisition,
/// status-file polling, subprocess waits).
pub fn bootstrap(quiet: bool) -> Result<Arc<AtomicBool>> {
    if Path::new(".env").exists() {
        dotenvy::dotenv().context("loading .env")?;
    }
    logger::init(quiet)?;

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("installing Ctrl-C handler")?;
    Ok(cancelled)
}

/// Opens the data-directory handle, honoring `--data-dir` if given.
pub fn open_home(data_dir: Option<&Path>) -> Result<Home> {
    match data_dir {
        Some(path) => Ok(Home::at(path)),
        None => Ok(Home::discover()?),
    }
}

/// `~/.config/ybox` (or equivalent), where bundled distribution INIs,
/// profile INIs, and an optional `overrides.ini` live.
pub fn config_home() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "ybox")
        .ok_or_else(|| anyhow::anyhow!("could not determine a config directory"))?;
    Ok(dirs.config_dir().to_path_buf())
}

pub fn distro_ini_path(config_home: &Path, distribution: &str) -> PathBuf {
    config_home.join("distros").join(distribution).join("distro.ini")
}

pub fn profile_ini_path(config_home: &Path, profile: &str) -> PathBuf {
    config_home.join("profiles").join(format!("{profile}.ini"))
}

/// The `overrides.ini` layered between a distribution's defaults and the
/// selected profile, if the user has one.
pub fn overrides_ini_path(config_home: &Path) -> Option<PathBuf> {
    let path = config_home.join("overrides.ini");
    path.exists().then_some(path)
}

/// Where this user's `.desktop`/exec-shim/man-page wrappers are written,
/// rooted at the ordinary (non-ybox-namespaced) XDG data/home directories so
/// generated applications show up next to natively installed ones.
pub fn wrapper_dirs() -> Result<ybox::pkg::WrapperDirs> {
    let dirs = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("could not determine a home directory"))?;
    Ok(ybox::pkg::WrapperDirs {
        applications: dirs.data_dir().join("applications"),
        bin: dirs.home_dir().join(".local/bin"),
        man: dirs.data_dir().join("man"),
    })
}

/// Maps a top-level failure to one of the exit codes fixed for the CLI
/// surface: 0 success, 1 user error, 2 I/O/engine error, 3 lock timeout,
/// 4 schema/migration error, 5 user-cancelled.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ybox::Error>() {
        Some(ybox::Error::LockTimeout(_)) => 3,
        Some(ybox::Error::SchemaTooNew { .. } | ybox::Error::NoMigrationPath(_)) => 4,
        Some(ybox::Error::Interrupted | ybox::Error::UserAbort) => 5,
        Some(
            ybox::Error::ConfigError(_)
            | ybox::Error::ConfigNotFound(_)
            | ybox::Error::IncludeCycle(_)
            | ybox::Error::UndefinedReference { .. }
            | ybox::Error::InterpolationCycle { .. }
            | ybox::Error::UndefinedPlaceholder(_)
            | ybox::Error::ContainerNotFound(_)
            | ybox::Error::ContainerAlreadyExists(_)
            | ybox::Error::DistributionNotFound(_)
            | ybox::Error::ProfileNotFound(_)
            | ybox::Error::PackageNotInstalled(_)
            | ybox::Error::PackageAlreadyInstalled(_),
        ) => 1,
        _ => 2,
    }
}

/// Logs `result`'s error (if any) with one line of context and exits the
/// process with the code mapped by [`exit_code`].
pub fn finish(result: Result<()>) -> ! {
    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            log::error!("{err:?}");
            std::process::exit(exit_code(&err));
        }
    }
}
