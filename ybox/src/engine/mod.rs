//! Container engine adapter: builds argv vectors for an external rootless
//! OCI engine (podman or docker) and invokes them as subprocesses, never via
//! a shell string.

pub mod spec;

use std::ffi::OsStr;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::debug;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

pub use spec::{ContainerListEntry, ContainerSpec, Device, ExecResult, Mount, UserNamespaceMode};

use crate::{Error, Result};

/// Interval at which a cancellable wait polls the child and the cancellation
/// flag, the same cadence used for lock contention elsewhere in this crate.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period given to a process group after `SIGTERM` before `SIGKILL`.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Locates the container engine binary: `YBOX_CONTAINER_MANAGER` env var
/// first, then `podman`, then `docker`, matching this crate's documented
/// detection order.
pub fn detect_engine() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("YBOX_CONTAINER_MANAGER") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
    }
    for candidate in ["/usr/bin/podman", "/usr/bin/docker"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Ok(path);
        }
    }
    Err(Error::EngineNotFound)
}

/// The operations the rest of this crate needs from a container engine.
/// Implemented by [`ProcessEngine`] against a real podman/docker binary and
/// by a fake in tests so engine-dependent code never has to shell out.
pub trait Engine {
    fn create(&self, spec: &ContainerSpec) -> Result<()>;
    fn start(&self, name: &str) -> Result<()>;
    fn stop(&self, name: &str, timeout: std::time::Duration) -> Result<()>;
    fn rm(&self, name: &str) -> Result<()>;
    /// Runs a one-shot command inside `name` and captures its output.
    /// `cancelled` is polled while waiting; if it flips to `true` before the
    /// command exits, its process group is signaled and
    /// [`Error::Interrupted`] is returned.
    fn exec(&self, name: &str, argv: &[String], cancelled: &AtomicBool) -> Result<ExecResult>;
    /// Streams (if `follow`) or prints a container's logs. `cancelled` is
    /// polled the same way as [`Engine::exec`], so `--follow` can be
    /// interrupted instead of blocking forever.
    fn logs(&self, name: &str, follow: bool, cancelled: &AtomicBool) -> Result<String>;
    fn list(&self) -> Result<Vec<ContainerListEntry>>;
    fn image_exists(&self, image: &str) -> Result<bool>;
    fn image_pull(&self, image: &str) -> Result<()>;
}

/// Engine adapter backed by a real podman/docker binary, invoked as a
/// subprocess with its exit code examined.
pub struct ProcessEngine {
    binary: PathBuf,
    user_ns_supported: bool,
}

impl ProcessEngine {
    pub fn new(binary: PathBuf) -> Self {
        let user_ns_supported = binary
            .file_name()
            .and_then(OsStr::to_str)
            .map(|name| name != "docker")
            .unwrap_or(true);
        Self {
            binary,
            user_ns_supported,
        }
    }

    pub fn detect() -> Result<Self> {
        Ok(Self::new(detect_engine()?))
    }

    fn command(&self) -> Command {
        Command::new(&self.binary)
    }

    fn run(&self, args: &[String]) -> Result<ExecResult> {
        let mut child = self.command();
        child.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        debug!("invoking {:?} {:?}", self.binary, args);
        let mut child = child.spawn()?;
        let status = child.wait()?;
        Ok(ExecResult {
            status,
            stdout: std::io::read_to_string(child.stdout.take().unwrap())?,
            stderr: std::io::read_to_string(child.stderr.take().unwrap())?,
        })
    }

    /// Like [`Self::run`], but spawns the child into its own process group
    /// and polls `cancelled` instead of blocking on `wait()` indefinitely:
    /// the suspension point a `podman exec`/`podman logs --follow` subprocess
    /// represents must be interruptible by Ctrl-C.
    fn run_cancellable(&self, args: &[String], cancelled: &AtomicBool) -> Result<ExecResult> {
        let mut command = self.command();
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        debug!("invoking {:?} {:?}", self.binary, args);
        let mut child = command.spawn()?;

        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(ExecResult {
                    status,
                    stdout: std::io::read_to_string(child.stdout.take().unwrap())?,
                    stderr: std::io::read_to_string(child.stderr.take().unwrap())?,
                });
            }
            if cancelled.load(Ordering::SeqCst) {
                kill_process_group(&child);
                let _ = child.wait();
                return Err(Error::Interrupted);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn check(&self, result: ExecResult, context: &str) -> Result<ExecResult> {
        if result.success() {
            Ok(result)
        } else {
            Err(Error::EngineError {
                status: result.status.code(),
                context: format!("{context}: {}", result.stderr.trim()),
            })
        }
    }

    fn build_create_args(&self, spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec!["create".to_owned(), "--name".to_owned(), spec.name.clone()];
        args.push("--hostname".to_owned());
        args.push(spec.hostname.clone());

        match spec.user_ns {
            UserNamespaceMode::KeepId if self.user_ns_supported => {
                args.push("--userns=keep-id".to_owned());
            }
            _ => {
                if let Some((uid, gid)) = spec.user {
                    args.push("--user".to_owned());
                    args.push(format!("{uid}:{gid}"));
                }
            }
        }

        for (key, value) in &spec.env {
            args.push("--env".to_owned());
            args.push(format!("{key}={value}"));
        }

        for mount in &spec.mounts {
            args.push("--mount".to_owned());
            let mode = if mount.read_only { "ro" } else { "rw" };
            args.push(format!(
                "type=bind,source={},destination={},{mode}",
                mount.host.display(),
                mount.guest.display()
            ));
        }

        for device in &spec.devices {
            args.push("--device".to_owned());
            args.push(format!(
                "{}:{}",
                device.host_path.display(),
                device.guest_path.display()
            ));
        }

        for cap in &spec.security.caps_add {
            args.push("--cap-add".to_owned());
            args.push(cap.clone());
        }
        for cap in &spec.security.caps_drop {
            args.push("--cap-drop".to_owned());
            args.push(cap.clone());
        }
        if spec.security.no_new_privileges {
            args.push("--security-opt".to_owned());
            args.push("no-new-privileges".to_owned());
        }
        if let Some(profile) = &spec.security.seccomp_profile {
            args.push("--security-opt".to_owned());
            args.push(format!("seccomp={}", profile.display()));
        }
        if let Some(profile) = &spec.security.apparmor_profile {
            args.push("--security-opt".to_owned());
            args.push(format!("apparmor={profile}"));
        }

        args.push("--network".to_owned());
        args.push(spec.network_mode.clone());

        if let Some(limit) = spec.pids_limit {
            args.push("--pids-limit".to_owned());
            args.push(limit.to_string());
        }
        if let Some(limit) = &spec.memory_limit {
            args.push("--memory".to_owned());
            args.push(limit.clone());
        }
        if let Some(dir) = &spec.working_dir {
            args.push("--workdir".to_owned());
            args.push(dir.display().to_string());
        }
        if let Some(entrypoint) = &spec.entrypoint {
            args.push("--entrypoint".to_owned());
            args.push(entrypoint.display().to_string());
        }

        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());
        args
    }
}

impl Engine for ProcessEngine {
    fn create(&self, spec: &ContainerSpec) -> Result<()> {
        let args = self.build_create_args(spec);
        let result = self.run(&args)?;
        self.check(result, "create")?;
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        let result = self.run(&["start".to_owned(), name.to_owned()])?;
        self.check(result, "start")?;
        Ok(())
    }

    fn stop(&self, name: &str, timeout: std::time::Duration) -> Result<()> {
        let result = self.run(&[
            "stop".to_owned(),
            "--time".to_owned(),
            timeout.as_secs().to_string(),
            name.to_owned(),
        ])?;
        self.check(result, "stop")?;
        Ok(())
    }

    fn rm(&self, name: &str) -> Result<()> {
        let result = self.run(&["rm".to_owned(), "-f".to_owned(), name.to_owned()])?;
        self.check(result, "rm")?;
        Ok(())
    }

    fn exec(&self, name: &str, argv: &[String], cancelled: &AtomicBool) -> Result<ExecResult> {
        let mut args = vec!["exec".to_owned(), name.to_owned()];
        args.extend(argv.iter().cloned());
        self.run_cancellable(&args, cancelled)
    }

    fn logs(&self, name: &str, follow: bool, cancelled: &AtomicBool) -> Result<String> {
        let mut args = vec!["logs".to_owned()];
        if follow {
            args.push("--follow".to_owned());
        }
        args.push(name.to_owned());
        let result = self.run_cancellable(&args, cancelled)?;
        let result = self.check(result, "logs")?;
        Ok(result.stdout)
    }

    fn list(&self) -> Result<Vec<ContainerListEntry>> {
        let result = self.run(&[
            "ps".to_owned(),
            "-a".to_owned(),
            "--format".to_owned(),
            "{{.Names}}\t{{.Image}}\t{{.Status}}".to_owned(),
        ])?;
        let result = self.check(result, "list")?;
        Ok(parse_list_output(&result.stdout))
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        let result = self.run(&["image".to_owned(), "exists".to_owned(), image.to_owned()])?;
        Ok(result.success())
    }

    fn image_pull(&self, image: &str) -> Result<()> {
        let result = self.run(&["pull".to_owned(), image.to_owned()])?;
        self.check(result, "pull")?;
        Ok(())
    }
}

/// Sends `SIGTERM` to `child`'s process group, waits [`KILL_GRACE`], then
/// escalates to `SIGKILL` for whatever is still alive.
fn kill_process_group(child: &Child) {
    let pgid = Pid::from_raw(child.id() as i32);
    let _ = signal::killpg(pgid, Signal::SIGTERM);
    std::thread::sleep(KILL_GRACE);
    let _ = signal::killpg(pgid, Signal::SIGKILL);
}

fn parse_list_output(stdout: &str) -> Vec<ContainerListEntry> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            Some(ContainerListEntry {
                name: parts.next()?.to_owned(),
                image: parts.next()?.to_owned(),
                status: parts.next().unwrap_or("").to_owned(),
            })
        })
        .collect()
}

/// Joins a guest-bound argv into a single shell-safe string, for the one
/// place this crate is allowed to shell-escape: handing a command to the
/// guest's own `exec` entrypoint.
pub fn shell_escape_for_guest(argv: &[String]) -> String {
    shell_words::join(argv)
}

#[cfg(test)]
pub mod fake;
