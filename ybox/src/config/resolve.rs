//! Pass 2 of the INI loader: lazily resolve `%(name)s` interpolation and
//! `${VAR}`/`$VAR` expansion over the raw AST, producing a flat
//! [`ResolvedProfile`].

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::config::ast::Ast;
use crate::{Error, Result};

/// A fully interpolated and environment-expanded configuration.
pub type ResolvedProfile = BTreeMap<String, BTreeMap<String, String>>;

/// The fixed set of names recognized as placeholders rather than arbitrary
/// environment variables. A `${NAME}` using one of these is an error if
/// unset; any other `${NAME}` silently passes through unresolved.
const RECOGNIZED: &[&str] = &[
    "TARGET_HOME",
    "TARGET_SCRIPTS_DIR",
    "HOME",
    "USER",
    "XDG_RUNTIME_DIR",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "CONTAINER_NAME",
    "CONTAINER_UID",
    "CONTAINER_GID",
];

/// Values bound for the recognized placeholder set, supplied by the caller
/// per container/profile resolution.
#[derive(Debug, Default, Clone)]
pub struct Placeholders(HashMap<String, String>);

impl Placeholders {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        debug_assert!(
            RECOGNIZED.contains(&name.as_str()),
            "{name} is not a recognized placeholder"
        );
        self.0.insert(name, value.into());
        self
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Resolves every value in `ast` against `placeholders`, returning a flat
/// profile. Interpolation is resolved lazily and memoized so shared
/// references are only expanded once; a reference cycle or an undefined
/// reference is a [`Error::ConfigError`]-family failure.
pub fn resolve(ast: &Ast, placeholders: &Placeholders) -> Result<ResolvedProfile> {
    let mut cache: HashMap<(String, String), String> = HashMap::new();
    let mut out = ResolvedProfile::new();

    for (section, keys) in ast {
        for key in keys.keys() {
            let mut in_progress = HashSet::new();
            let value = resolve_key(ast, placeholders, section, key, &mut cache, &mut in_progress)?;
            out.entry(section.clone()).or_default().insert(key.clone(), value);
        }
    }

    Ok(out)
}

fn resolve_key(
    ast: &Ast,
    placeholders: &Placeholders,
    section: &str,
    key: &str,
    cache: &mut HashMap<(String, String), String>,
    in_progress: &mut HashSet<(String, String)>,
) -> Result<String> {
    let cache_key = (section.to_owned(), key.to_owned());
    if let Some(cached) = cache.get(&cache_key) {
        return Ok(cached.clone());
    }
    if !in_progress.insert(cache_key.clone()) {
        return Err(Error::InterpolationCycle {
            section: section.to_owned(),
            key: key.to_owned(),
        });
    }

    let raw = ast
        .get(section)
        .and_then(|s| s.get(key))
        .ok_or_else(|| Error::UndefinedReference {
            section: section.to_owned(),
            key: key.to_owned(),
            reference: key.to_owned(),
        })?;

    let interpolated = interpolate(ast, placeholders, section, raw, cache, in_progress)?;
    let expanded = expand_env(&interpolated, placeholders)?;

    in_progress.remove(&cache_key);
    cache.insert(cache_key, expanded.clone());
    Ok(expanded)
}

/// Expands every `%(name)s` reference within `raw`, looking `name` up in the
/// same section and resolving it recursively (with cycle detection).
fn interpolate(
    ast: &Ast,
    placeholders: &Placeholders,
    section: &str,
    raw: &str,
    cache: &mut HashMap<(String, String), String>,
    in_progress: &mut HashSet<(String, String)>,
) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && raw[i..].starts_with("%(") {
            if let Some(close) = raw[i + 2..].find(")s") {
                let name = &raw[i + 2..i + 2 + close];
                if ast.get(section).map(|s| s.contains_key(name)) != Some(true) {
                    return Err(Error::UndefinedReference {
                        section: section.to_owned(),
                        key: name.to_owned(),
                        reference: name.to_owned(),
                    });
                }
                let resolved = resolve_key(ast, placeholders, section, name, cache, in_progress)?;
                out.push_str(&resolved);
                i += 2 + close + 2;
                continue;
            }
        }
        let ch = raw[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    Ok(out)
}

/// Expands `${VAR}` and bare `$VAR` references from the recognized
/// placeholder set or the process environment.
fn expand_env(raw: &str, placeholders: &Placeholders) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$' {
            if i + 1 < chars.len() && chars[i + 1] == '{' {
                if let Some(end) = chars[i + 2..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + 2 + end].iter().collect();
                    out.push_str(&lookup_placeholder(&name, placeholders)?);
                    i += 2 + end + 1;
                    continue;
                }
            } else if i + 1 < chars.len() && (chars[i + 1].is_alphabetic() || chars[i + 1] == '_') {
                let mut end = i + 1;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[i + 1..end].iter().collect();
                out.push_str(&lookup_placeholder(&name, placeholders)?);
                i = end;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    Ok(out)
}

fn lookup_placeholder(name: &str, placeholders: &Placeholders) -> Result<String> {
    if RECOGNIZED.contains(&name) {
        placeholders
            .get(name)
            .map(str::to_owned)
            .or_else(|| std::env::var(name).ok())
            .ok_or_else(|| Error::UndefinedPlaceholder(name.to_owned()))
    } else {
        match std::env::var(name) {
            Ok(value) => Ok(value),
            Err(_) => Ok(format!("${{{name}}}")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ast_from(pairs: &[(&str, &str, &str)]) -> Ast {
        let mut ast = Ast::new();
        for (section, key, value) in pairs {
            ast.entry(section.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
        }
        ast
    }

    #[test_log::test]
    fn resolves_plain_values() {
        let ast = ast_from(&[("base", "name", "c1")]);
        let resolved = resolve(&ast, &Placeholders::new()).unwrap();
        assert_eq!(resolved["base"]["name"], "c1");
    }

    #[test_log::test]
    fn interpolates_same_section_reference() {
        let ast = ast_from(&[
            ("base", "root", "/srv/ybox"),
            ("base", "home", "%(root)s/home"),
        ]);
        let resolved = resolve(&ast, &Placeholders::new()).unwrap();
        assert_eq!(resolved["base"]["home"], "/srv/ybox/home");
    }

    #[test_log::test]
    fn detects_interpolation_cycle() {
        let ast = ast_from(&[("base", "a", "%(b)s"), ("base", "b", "%(a)s")]);
        let err = resolve(&ast, &Placeholders::new()).unwrap_err();
        assert!(matches!(err, Error::InterpolationCycle { .. }));
    }

    #[test_log::test]
    fn undefined_interpolation_reference_errors() {
        let ast = ast_from(&[("base", "a", "%(nope)s")]);
        let err = resolve(&ast, &Placeholders::new()).unwrap_err();
        assert!(matches!(err, Error::UndefinedReference { .. }));
    }

    #[test_log::test]
    fn expands_recognized_placeholder() {
        let ast = ast_from(&[("mounts", "home", "${TARGET_HOME}/.config")]);
        let mut placeholders = Placeholders::new();
        placeholders.set("TARGET_HOME", "/home/alice");
        let resolved = resolve(&ast, &placeholders).unwrap();
        assert_eq!(resolved["mounts"]["home"], "/home/alice/.config");
    }

    #[test_log::test]
    fn undefined_recognized_placeholder_errors() {
        let ast = ast_from(&[("mounts", "home", "${TARGET_HOME}")]);
        let err = resolve(&ast, &Placeholders::new()).unwrap_err();
        assert!(matches!(err, Error::UndefinedPlaceholder(_)));
    }

    #[test_log::test]
    fn unrecognized_placeholder_passes_through_literally() {
        let ast = ast_from(&[("env", "v", "${SOME_UNSET_THING_NOBODY_SETS}")]);
        let resolved = resolve(&ast, &Placeholders::new()).unwrap();
        assert_eq!(resolved["env"]["v"], "${SOME_UNSET_THING_NOBODY_SETS}");
    }
}
