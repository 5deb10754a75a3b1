//! Container status-file polling.
//!
//! Every container writes a single-line status file at a known path inside
//! its persisted layout: `started`, `stopped`, or empty while transient. The
//! orchestrator polls it with bounded exponential backoff rather than a fixed
//! interval, mirroring the boot/poweroff wait loops used elsewhere in this
//! codebase's engine adapters.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::{Error, Result};

/// Default ceiling on the total time spent waiting for a status transition.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// The contents of a container's status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The file is empty or absent: the container is between states.
    Transient,
    Started,
    Stopped,
}

impl Status {
    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "started" => Status::Started,
            "stopped" => Status::Stopped,
            _ => Status::Transient,
        }
    }
}

/// Reads the current status, treating a missing file as [`Status::Transient`].
pub fn read_status(status_file: &Path) -> Result<Status> {
    match std::fs::read_to_string(status_file) {
        Ok(raw) => Ok(Status::parse(&raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Status::Transient),
        Err(e) => Err(e.into()),
    }
}

/// Polls `status_file` until it reports `want`, `timeout` elapses, or
/// `cancelled` is raised.
///
/// Backoff follows `ln(i + 1).ceil()` seconds per attempt, the same curve
/// this codebase already uses for machine boot/poweroff waits, capped so the
/// overall wait never exceeds `timeout`.
pub fn wait_for_status(
    status_file: &Path,
    want: Status,
    timeout: Duration,
    cancelled: &AtomicBool,
) -> Result<()> {
    let deadline = std::time::Instant::now() + timeout;
    let mut attempt: u32 = 0;
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return Err(Error::Interrupted);
        }
        if read_status(status_file)? == want {
            return Ok(());
        }
        if std::time::Instant::now() >= deadline {
            return Err(Error::ContainerNotReady(
                status_file.display().to_string(),
            ));
        }
        attempt += 1;
        let backoff = Duration::from_secs_f32(((attempt + 1) as f32).ln().ceil().max(1.0));
        std::thread::sleep(backoff.min(deadline.saturating_duration_since(std::time::Instant::now())));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::TestDir;

    #[test_log::test]
    fn parses_known_states() {
        assert_eq!(Status::parse("started\n"), Status::Started);
        assert_eq!(Status::parse("stopped"), Status::Stopped);
        assert_eq!(Status::parse(""), Status::Transient);
        assert_eq!(Status::parse("garbage"), Status::Transient);
    }

    #[test_log::test]
    fn missing_file_is_transient() {
        let dir = TestDir::new();
        let path = dir.path().join("status");
        assert_eq!(read_status(&path).unwrap(), Status::Transient);
    }

    #[test_log::test]
    fn wait_succeeds_once_file_matches() {
        let dir = TestDir::new();
        let path = dir.path().join("status");
        std::fs::write(&path, "started").unwrap();
        let cancelled = AtomicBool::new(false);
        wait_for_status(&path, Status::Started, Duration::from_secs(5), &cancelled).unwrap();
    }

    #[test_log::test]
    fn wait_times_out_without_transition() {
        let dir = TestDir::new();
        let path = dir.path().join("status");
        std::fs::write(&path, "").unwrap();
        let cancelled = AtomicBool::new(false);
        let err = wait_for_status(
            &path,
            Status::Started,
            Duration::from_millis(50),
            &cancelled,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ContainerNotReady(_)));
    }

    #[test_log::test]
    fn wait_honors_cancellation() {
        let dir = TestDir::new();
        let path = dir.path().join("status");
        std::fs::write(&path, "").unwrap();
        let cancelled = AtomicBool::new(true);
        let err = wait_for_status(&path, Status::Started, Duration::from_secs(30), &cancelled)
            .unwrap_err();
        assert!(matches!(err, Error::Interrupted));
    }
}
