//! Profile compiler: translates a resolved INI profile into a
//! [`ContainerSpec`] plus the manifest files copied into the container's
//! scripts directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::ResolvedProfile;
use crate::engine::{Mount, UserNamespaceMode};
use crate::{Error, Result};

pub use crate::engine::ContainerSpec;

/// How a `[configs]` entry is materialized inside the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAction {
    Copy,
    Link,
    LinkDir,
}

impl ConfigAction {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "COPY" => Ok(Self::Copy),
            "LINK" => Ok(Self::Link),
            "LINK_DIR" => Ok(Self::LinkDir),
            other => Err(Error::ConfigError(format!(
                "unknown [configs] action {other:?}, expected COPY, LINK or LINK_DIR"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLink {
    pub host_source: PathBuf,
    pub guest_target: PathBuf,
    pub action: ConfigAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEntry {
    pub name: String,
    pub flags: Vec<String>,
}

/// Everything the profile compiler produces for one container: the engine
/// spec plus the three manifests copied into its scripts directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProfile {
    pub spec: ContainerSpec,
    pub config_links: Vec<ConfigLink>,
    pub apps: Vec<AppEntry>,
    pub startup: Vec<Vec<String>>,
}

/// Host-side facts the compiler needs that don't come from the profile
/// itself: where this container's persisted layout lives, and whether the
/// shared-root manager has already allocated a root for its distribution.
pub struct CompileContext<'a> {
    pub container_name: &'a str,
    pub home_dir: &'a Path,
    pub scripts_dir: &'a Path,
    pub shared_root: Option<&'a Path>,
    pub user: (u32, u32),
}

const ALWAYS_STRIPPED_CAPS: &[&str] = &["SYS_ADMIN", "SYS_MODULE", "SYS_PTRACE"];

pub fn compile(resolved: &ResolvedProfile, ctx: &CompileContext) -> Result<CompiledProfile> {
    let base = section(resolved, "base");
    let image = base
        .get("image")
        .ok_or_else(|| Error::ConfigError("[base] is missing required key 'image'".to_owned()))?;

    let mut spec = ContainerSpec::new(image.clone(), ctx.container_name.to_owned());
    spec.user = Some(ctx.user);
    spec.user_ns = UserNamespaceMode::KeepId;
    spec.mounts.push(Mount::new(
        ctx.home_dir,
        format!("/home/{}", ctx.container_name),
        false,
    ));
    spec.mounts.push(Mount::new(
        ctx.scripts_dir,
        "/ybox/scripts",
        true,
    ));
    spec.env
        .push(("YBOX_TARGET_SCRIPTS_DIR".to_owned(), "/ybox/scripts".to_owned()));

    apply_shared_root(&mut spec, resolved, ctx)?;
    apply_security(&mut spec, resolved)?;
    apply_mounts(&mut spec, resolved, ctx.container_name)?;
    apply_env(&mut spec, resolved);

    let config_links = compile_configs(resolved)?;
    let apps = compile_apps(resolved);
    let startup = compile_startup(resolved);

    Ok(CompiledProfile {
        spec,
        config_links,
        apps,
        startup,
    })
}

fn section<'a>(resolved: &'a ResolvedProfile, name: &str) -> BTreeMap<&'a str, &'a str> {
    resolved
        .get(name)
        .map(|m| m.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect())
        .unwrap_or_default()
}

fn apply_shared_root(
    spec: &mut ContainerSpec,
    resolved: &ResolvedProfile,
    ctx: &CompileContext,
) -> Result<()> {
    let base = section(resolved, "base");
    let Some(shared_root) = ctx.shared_root else {
        return Ok(());
    };
    let dirs = base
        .get("shared_root_dirs")
        .map(|v| split_csv(v))
        .unwrap_or_else(|| vec!["usr".into(), "etc".into(), "opt".into(), "var".into()]);
    for dir in dirs {
        spec.mounts.push(Mount::new(
            shared_root.join(&dir),
            format!("/{dir}"),
            true,
        ));
    }
    Ok(())
}

fn apply_security(spec: &mut ContainerSpec, resolved: &ResolvedProfile) -> Result<()> {
    let security = section(resolved, "security");
    if let Some(caps) = security.get("caps_add") {
        spec.security.caps_add = split_csv(caps)
            .into_iter()
            .filter(|c| !ALWAYS_STRIPPED_CAPS.contains(&c.as_str()))
            .collect();
    }
    if let Some(caps) = security.get("caps_drop") {
        spec.security.caps_drop = split_csv(caps);
    }
    spec.security.no_new_privileges = security
        .get("no_new_privileges")
        .map(|v| parse_bool(v))
        .unwrap_or(true);
    if let Some(seccomp) = security.get("seccomp") {
        spec.security.seccomp_profile = Some(PathBuf::from(seccomp));
    }
    if let Some(apparmor) = security.get("apparmor") {
        spec.security.apparmor_profile = Some((*apparmor).to_owned());
    }
    Ok(())
}

fn apply_mounts(spec: &mut ContainerSpec, resolved: &ResolvedProfile, container_name: &str) -> Result<()> {
    let base = section(resolved, "base");
    let allow_home_share = base.get("allow_home_share").map(|v| parse_bool(v)).unwrap_or(false);

    let Some(mounts) = resolved.get("mounts") else {
        return Ok(());
    };
    for (key, value) in mounts {
        let parts: Vec<&str> = value.splitn(3, ':').collect();
        let [host, guest] = [parts.first().copied().unwrap_or(""), parts.get(1).copied().unwrap_or("")];
        if host.is_empty() || guest.is_empty() {
            return Err(Error::ConfigError(format!(
                "[mounts] {key} must be host:guest[:mode], got {value:?}"
            )));
        }
        if !allow_home_share && is_home_path(host) {
            return Err(Error::ConfigError(format!(
                "[mounts] {key} would bind-mount $HOME into container {container_name}; \
                 set allow_home_share=true in [base] to permit this"
            )));
        }
        let read_only = parts.get(2).map(|m| *m == "ro").unwrap_or(false);
        spec.mounts.push(Mount::new(host, guest, read_only));
    }
    Ok(())
}

fn is_home_path(host: &str) -> bool {
    std::env::var("HOME")
        .map(|home| host == home || host.starts_with(&format!("{home}/")))
        .unwrap_or(false)
}

fn apply_env(spec: &mut ContainerSpec, resolved: &ResolvedProfile) {
    if let Some(env) = resolved.get("env") {
        for (key, value) in env {
            spec.env.push((key.clone(), value.clone()));
        }
    }
}

fn compile_configs(resolved: &ResolvedProfile) -> Result<Vec<ConfigLink>> {
    let Some(configs) = resolved.get("configs") else {
        return Ok(Vec::new());
    };
    let mut links = Vec::new();
    for (key, value) in configs {
        let mut parts = value.splitn(2, "->").map(str::trim);
        let target = parts
            .next()
            .ok_or_else(|| Error::ConfigError(format!("[configs] {key} is malformed")))?;
        let rest = parts
            .next()
            .ok_or_else(|| Error::ConfigError(format!("[configs] {key} missing '-> target'")))?;
        let mut rest_parts = rest.splitn(2, char::is_whitespace);
        let guest_target = rest_parts.next().unwrap_or_default();
        let action = rest_parts
            .next()
            .map(str::trim)
            .unwrap_or("COPY");
        links.push(ConfigLink {
            host_source: PathBuf::from(key),
            guest_target: PathBuf::from(if guest_target.is_empty() { target } else { guest_target }),
            action: ConfigAction::parse(action)?,
        });
    }
    Ok(links)
}

fn compile_apps(resolved: &ResolvedProfile) -> Vec<AppEntry> {
    let apps = resolved.get("apps");
    let flags = resolved.get("app_flags");
    let Some(apps) = apps else {
        return Vec::new();
    };
    apps.keys()
        .map(|name| AppEntry {
            name: name.clone(),
            flags: flags
                .and_then(|f| f.get(name))
                .map(|v| split_csv(v))
                .unwrap_or_default(),
        })
        .collect()
}

fn compile_startup(resolved: &ResolvedProfile) -> Vec<Vec<String>> {
    let Some(startup) = resolved.get("startup") else {
        return Vec::new();
    };
    let mut entries: Vec<(&String, &String)> = startup.iter().collect();
    entries.sort_by_key(|(key, _)| key.clone());
    entries
        .into_iter()
        .map(|(_, cmd)| shell_words::split(cmd).unwrap_or_else(|_| vec![cmd.clone()]))
        .collect()
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect()
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Placeholders;

    fn resolved_from(pairs: &[(&str, &str, &str)]) -> ResolvedProfile {
        let mut out = ResolvedProfile::new();
        for (section, key, value) in pairs {
            out.entry(section.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
        }
        out
    }

    fn ctx<'a>(home: &'a Path, scripts: &'a Path) -> CompileContext<'a> {
        CompileContext {
            container_name: "c1",
            home_dir: home,
            scripts_dir: scripts,
            shared_root: None,
            user: (1000, 1000),
        }
    }

    #[test_log::test]
    fn compiles_minimal_profile() {
        let resolved = resolved_from(&[("base", "image", "archlinux:latest")]);
        let home = PathBuf::from("/data/c1/home");
        let scripts = PathBuf::from("/data/c1/scripts");
        let compiled = compile(&resolved, &ctx(&home, &scripts)).unwrap();
        assert_eq!(compiled.spec.image, "archlinux:latest");
        assert!(compiled.spec.mounts.iter().any(|m| m.guest == Path::new("/home/c1")));
    }

    #[test_log::test]
    fn rejects_home_mount_without_opt_in() {
        std::env::set_var("HOME", "/home/alice");
        let resolved = resolved_from(&[
            ("base", "image", "archlinux:latest"),
            ("mounts", "whole_home", "/home/alice:/home/alice"),
        ]);
        let home = PathBuf::from("/data/c1/home");
        let scripts = PathBuf::from("/data/c1/scripts");
        let err = compile(&resolved, &ctx(&home, &scripts)).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test_log::test]
    fn allow_home_share_permits_the_mount() {
        std::env::set_var("HOME", "/home/alice");
        let resolved = resolved_from(&[
            ("base", "image", "archlinux:latest"),
            ("base", "allow_home_share", "true"),
            ("mounts", "whole_home", "/home/alice:/home/alice"),
        ]);
        let home = PathBuf::from("/data/c1/home");
        let scripts = PathBuf::from("/data/c1/scripts");
        let compiled = compile(&resolved, &ctx(&home, &scripts)).unwrap();
        assert!(compiled
            .spec
            .mounts
            .iter()
            .any(|m| m.guest == Path::new("/home/alice")));
    }

    #[test_log::test]
    fn strips_always_forbidden_capabilities() {
        let resolved = resolved_from(&[
            ("base", "image", "archlinux:latest"),
            ("security", "caps_add", "SYS_ADMIN, NET_ADMIN"),
        ]);
        let home = PathBuf::from("/data/c1/home");
        let scripts = PathBuf::from("/data/c1/scripts");
        let compiled = compile(&resolved, &ctx(&home, &scripts)).unwrap();
        assert_eq!(compiled.spec.security.caps_add, vec!["NET_ADMIN".to_owned()]);
    }

    #[test_log::test]
    fn shared_root_adds_readonly_bind_mounts() {
        let resolved = resolved_from(&[("base", "image", "archlinux:latest")]);
        let home = PathBuf::from("/data/c1/home");
        let scripts = PathBuf::from("/data/c1/scripts");
        let shared_root = PathBuf::from("/data/SHARED_ROOTS/arch");
        let mut c = ctx(&home, &scripts);
        c.shared_root = Some(&shared_root);
        let compiled = compile(&resolved, &c).unwrap();
        let usr_mount = compiled
            .spec
            .mounts
            .iter()
            .find(|m| m.guest == Path::new("/usr"))
            .unwrap();
        assert!(usr_mount.read_only);
    }
}
