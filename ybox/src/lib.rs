//! ybox manages per-user Linux distribution containers, run through a rootless
//! OCI-compatible container engine (podman or docker), as secure application
//! sandboxes on a graphical workstation.
//!
//! This crate is the library shared by the `ybox-*` command-line front-ends. It
//! owns the four tightly coupled subsystems where the real engineering lives:
//! profile resolution and container materialization ([`config`], [`profile`]),
//! the shared-root lifecycle ([`sharedroot`]), the distribution-agnostic
//! package orchestrator ([`pkg`]), and the state database ([`state`]).

pub mod config;
pub mod container;
pub mod engine;
pub mod home;
pub mod lock;
pub mod pkg;
pub mod profile;
pub mod sharedroot;
pub mod state;
pub mod status;
pub mod wrapper;

pub use container::Container;
pub use home::Home;
pub use profile::ContainerSpec;

pub type Result<T> = std::result::Result<T, Error>;

/// An error produced by ybox.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Some Mutex/RwLock are poisoned")]
    PoisonError,
    #[error(transparent)]
    SyscallError(#[from] nix::Error),
    #[error(transparent)]
    FsTraverseError(#[from] walkdir::Error),
    #[error(transparent)]
    StripPrefixError(#[from] std::path::StripPrefixError),
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Configuration file not found: {0}")]
    ConfigNotFound(std::path::PathBuf),
    #[error("Include cycle detected while resolving {0:?}")]
    IncludeCycle(std::path::PathBuf),
    #[error("Undefined interpolation reference: {section}.{key} -> %({reference})s")]
    UndefinedReference {
        section: String,
        key: String,
        reference: String,
    },
    #[error("Interpolation cycle detected at {section}.{key}")]
    InterpolationCycle { section: String, key: String },
    #[error("Undefined environment placeholder: ${{{0}}}")]
    UndefinedPlaceholder(String),

    #[error("Database error: {0}")]
    DbError(#[from] rusqlite::Error),
    #[error("Schema is newer than this build of ybox supports (db: {db}, supported: {supported})")]
    SchemaTooNew { db: String, supported: String },
    #[error("No migration path found from schema version {0}")]
    NoMigrationPath(String),

    #[error("Lock on {0:?} could not be acquired within the configured timeout")]
    LockTimeout(std::path::PathBuf),

    #[error("Container engine binary not found (checked YBOX_CONTAINER_MANAGER, podman, docker)")]
    EngineNotFound,
    #[error("Container engine command failed (exit: {status:?}): {context}")]
    EngineError {
        status: Option<i32>,
        context: String,
    },

    #[error("Container not found: {0}")]
    ContainerNotFound(String),
    #[error("Container already exists: {0}")]
    ContainerAlreadyExists(String),
    #[error("Container {0} did not become ready within the configured timeout")]
    ContainerNotReady(String),
    #[error("Distribution not found: {0}")]
    DistributionNotFound(String),
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Package operation failed: {0}")]
    PackageOpError(String),
    #[error("Package not installed: {0}")]
    PackageNotInstalled(String),
    #[error("Package already installed: {0}")]
    PackageAlreadyInstalled(String),

    #[error("Operation interrupted")]
    Interrupted,
    #[error("Aborted by user")]
    UserAbort,
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::PoisonError
    }
}
