//! Structured description of a container to be created, built by the profile
//! compiler and consumed only by the engine adapter — never serialized into
//! a shell string.

use std::path::PathBuf;

/// A host-to-guest bind mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub guest: PathBuf,
    pub read_only: bool,
}

impl Mount {
    pub fn new(host: impl Into<PathBuf>, guest: impl Into<PathBuf>, read_only: bool) -> Self {
        Self {
            host: host.into(),
            guest: guest.into(),
            read_only,
        }
    }
}

/// A device node exposed into the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub host_path: PathBuf,
    pub guest_path: PathBuf,
}

/// Whether and how the engine maps the invoking user's UID/GID into the
/// guest user namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserNamespaceMode {
    /// Guest UID 0 maps to the host's invoking user (`--userns=keep-id`).
    #[default]
    KeepId,
    /// No user namespace remapping; the guest runs as root and an
    /// in-container entrypoint script reconciles ownership using
    /// `YBOX_HOST_UID`/`YBOX_HOST_GID`.
    None,
}

/// Security posture for a container, derived from a profile's `[security]`
/// section with unsafe combinations already stripped by the profile compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityOpts {
    pub caps_add: Vec<String>,
    pub caps_drop: Vec<String>,
    pub no_new_privileges: bool,
    pub seccomp_profile: Option<PathBuf>,
    pub apparmor_profile: Option<String>,
}

/// Everything the engine adapter needs to create a container; the output of
/// the profile compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub hostname: String,
    /// `uid:gid` to run as inside the guest, or `None` to take the engine's
    /// default (only meaningful when `user_ns == UserNamespaceMode::None`).
    pub user: Option<(u32, u32)>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    pub devices: Vec<Device>,
    pub security: SecurityOpts,
    pub network_mode: String,
    pub pids_limit: Option<u32>,
    pub memory_limit: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub entrypoint: Option<PathBuf>,
    pub command: Vec<String>,
    pub user_ns: UserNamespaceMode,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            image: image.into(),
            hostname: name.clone(),
            name,
            user: None,
            env: Vec::new(),
            mounts: Vec::new(),
            devices: Vec::new(),
            security: SecurityOpts::default(),
            network_mode: "bridge".to_owned(),
            pids_limit: None,
            memory_limit: None,
            working_dir: None,
            entrypoint: None,
            command: Vec::new(),
            user_ns: UserNamespaceMode::default(),
        }
    }
}

/// The outcome of a captured subprocess invocation (`exec`, template
/// commands): exit status plus buffered stdout/stderr.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// One row of `engine ls --format ...` output, parsed by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerListEntry {
    pub name: String,
    pub image: String,
    pub status: String,
}
