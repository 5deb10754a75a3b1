//! In-process fake engine adapter for tests that must not shell out to a
//! real container engine.

use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use super::{ContainerListEntry, ContainerSpec, Engine, ExecResult};
use crate::Result;

#[derive(Default)]
pub struct FakeEngine {
    containers: Mutex<HashMap<String, ContainerSpec>>,
    /// Scripted responses for `exec`, keyed by the joined argv.
    pub exec_responses: Mutex<HashMap<String, ExecResult>>,
    pub create_calls: Mutex<Vec<String>>,
}

fn ok_status() -> ExitStatus {
    ExitStatus::from_raw(0)
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_exec(&self, argv: &[&str], stdout: &str) {
        self.exec_responses.lock().unwrap().insert(
            argv.join(" "),
            ExecResult {
                status: ok_status(),
                stdout: stdout.to_owned(),
                stderr: String::new(),
            },
        );
    }
}

impl Engine for FakeEngine {
    fn create(&self, spec: &ContainerSpec) -> Result<()> {
        self.create_calls.lock().unwrap().push(spec.name.clone());
        self.containers
            .lock()
            .unwrap()
            .insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    fn start(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn stop(&self, _name: &str, _timeout: std::time::Duration) -> Result<()> {
        Ok(())
    }

    fn rm(&self, name: &str) -> Result<()> {
        self.containers.lock().unwrap().remove(name);
        Ok(())
    }

    fn exec(&self, _name: &str, argv: &[String], _cancelled: &AtomicBool) -> Result<ExecResult> {
        let key = argv.join(" ");
        Ok(self
            .exec_responses
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or(ExecResult {
                status: ok_status(),
                stdout: String::new(),
                stderr: String::new(),
            }))
    }

    fn logs(&self, _name: &str, _follow: bool, _cancelled: &AtomicBool) -> Result<String> {
        Ok(String::new())
    }

    fn list(&self) -> Result<Vec<ContainerListEntry>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .values()
            .map(|spec| ContainerListEntry {
                name: spec.name.clone(),
                image: spec.image.clone(),
                status: "Up".to_owned(),
            })
            .collect())
    }

    fn image_exists(&self, _image: &str) -> Result<bool> {
        Ok(true)
    }

    fn image_pull(&self, _image: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn create_then_list_round_trips() {
        let engine = FakeEngine::new();
        let spec = ContainerSpec::new("archlinux:latest", "c1");
        engine.create(&spec).unwrap();
        let listed = engine.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "c1");
    }

    #[test_log::test]
    fn scripted_exec_returns_fixed_output() {
        let engine = FakeEngine::new();
        engine.script_exec(&["pacman", "-Qi", "firefox"], "Name: firefox\n");
        let cancelled = AtomicBool::new(false);
        let result = engine
            .exec(
                "c1",
                &["pacman".to_owned(), "-Qi".to_owned(), "firefox".to_owned()],
                &cancelled,
            )
            .unwrap();
        assert_eq!(result.stdout, "Name: firefox\n");
    }
}
