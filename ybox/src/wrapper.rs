//! Host-side wrapper generation: `.desktop` rewriting, executable shims, and
//! man-page symlinks, so a guest application looks host-installed.
//!
//! Every path this module writes is expected to be recorded by the caller in
//! `packages.local_copies`; removal here is always idempotent so replaying
//! an uninstall against a partially-cleaned package is safe.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::Result;

/// Rewrites a guest `.desktop` file's `Exec=` line to invoke the exec-into-
/// container trampoline, preserving any field codes in position, and writes
/// the result to `$XDG_DATA_HOME/applications/<container>-<basename>`.
pub fn rewrite_desktop_file(
    source: &Path,
    dest_applications_dir: &Path,
    container: &str,
    extra_flags: &[String],
) -> Result<PathBuf> {
    let original = std::fs::read_to_string(source)?;
    let mut out = String::with_capacity(original.len());

    for line in original.lines() {
        if let Some(rest) = line.strip_prefix("Exec=") {
            let rewritten = rewrite_exec_line(rest, container, extra_flags);
            out.push_str("Exec=");
            out.push_str(&rewritten);
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }

    std::fs::create_dir_all(dest_applications_dir)?;
    let basename = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app.desktop".to_owned());
    let dest = dest_applications_dir.join(format!("{container}-{basename}"));
    std::fs::write(&dest, out)?;
    debug!("wrote desktop wrapper {dest:?}");
    Ok(dest)
}

fn rewrite_exec_line(original_exec: &str, container: &str, extra_flags: &[String]) -> String {
    let original_argv = shell_words::split(original_exec).unwrap_or_else(|_| {
        original_exec.split_whitespace().map(str::to_owned).collect()
    });

    let mut trampoline = vec!["ybox-cmd".to_owned(), container.to_owned(), "--".to_owned()];
    trampoline.extend(original_argv);
    trampoline.extend(extra_flags.iter().cloned());
    shell_words::join(&trampoline)
}

/// Writes an executable shim into `$HOME/.local/bin` that execs the named
/// program inside `container` via the same trampoline used by desktop
/// wrappers.
pub fn write_exec_shim(
    exe_name: &str,
    container: &str,
    bin_dir: &Path,
    extra_flags: &[String],
) -> Result<PathBuf> {
    std::fs::create_dir_all(bin_dir)?;
    let dest = bin_dir.join(format!("{container}-{exe_name}"));

    let mut argv = vec!["ybox-cmd".to_owned(), container.to_owned(), "--".to_owned(), exe_name.to_owned()];
    argv.extend(extra_flags.iter().cloned());
    let command_line = shell_words::join(&argv);

    let script = format!("#!/bin/sh\nexec {command_line} \"$@\"\n");
    std::fs::write(&dest, script)?;

    let mut perms = std::fs::metadata(&dest)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&dest, perms)?;

    debug!("wrote exec shim {dest:?}");
    Ok(dest)
}

/// Symlinks a guest man page under `$XDG_DATA_HOME/man/<section>/`.
pub fn link_man_page(source_man_path: &Path, dest_man_root: &Path) -> Result<PathBuf> {
    let section = source_man_path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "man1".to_owned());
    let basename = source_man_path
        .file_name()
        .ok_or_else(|| crate::Error::ConfigError(format!("{source_man_path:?} has no filename")))?;

    let dest_dir = dest_man_root.join(&section);
    std::fs::create_dir_all(&dest_dir)?;
    let dest = dest_dir.join(basename);

    if dest.symlink_metadata().is_ok() {
        std::fs::remove_file(&dest)?;
    }
    std::os::unix::fs::symlink(source_man_path, &dest)?;
    debug!("linked man page {dest:?}");
    Ok(dest)
}

/// Removes a previously generated wrapper file, ignoring a missing file.
pub fn remove_wrapper(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::TestDir;

    #[test_log::test]
    fn rewrites_exec_line_preserving_field_codes() {
        let dir = TestDir::new();
        let source = dir.path().join("firefox.desktop");
        std::fs::write(
            &source,
            "[Desktop Entry]\nName=Firefox\nExec=firefox %u\nIcon=firefox\n",
        )
        .unwrap();

        let dest_dir = dir.path().join("applications");
        let dest = rewrite_desktop_file(&source, &dest_dir, "c1", &[]).unwrap();
        let contents = std::fs::read_to_string(&dest).unwrap();
        assert!(contents.contains("Exec=ybox-cmd c1 -- firefox %u"));
        assert!(contents.contains("Name=Firefox"));
        assert_eq!(dest.file_name().unwrap(), "c1-firefox.desktop");
    }

    #[test_log::test]
    fn exec_shim_is_executable_and_passes_through_args() {
        let dir = TestDir::new();
        let bin_dir = dir.path().join("bin");
        let dest = write_exec_shim("firefox", "c1", &bin_dir, &[]).unwrap();
        let contents = std::fs::read_to_string(&dest).unwrap();
        assert!(contents.contains("exec ybox-cmd c1 -- firefox \"$@\""));
        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test_log::test]
    fn man_page_link_points_at_source() {
        let dir = TestDir::new();
        let man_src = dir.path().join("man1/firefox.1");
        std::fs::create_dir_all(man_src.parent().unwrap()).unwrap();
        std::fs::write(&man_src, "man page").unwrap();

        let dest_root = dir.path().join("man");
        let dest = link_man_page(&man_src, &dest_root).unwrap();
        assert!(dest.symlink_metadata().unwrap().file_type().is_symlink());
    }

    #[test_log::test]
    fn removing_a_missing_wrapper_is_not_an_error() {
        let dir = TestDir::new();
        let missing = dir.path().join("does-not-exist");
        remove_wrapper(&missing).unwrap();
    }
}
