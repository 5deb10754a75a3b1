//! Pass 1 of the INI loader: parse layered files (following `base.includes`
//! chains) into an immutable section → key → raw-value tree.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// A fully merged but not-yet-interpolated configuration tree.
///
/// Keys are merged across the whole include/override chain with last-write-wins
/// semantics; only the final raw string per `(section, key)` survives.
pub type Ast = BTreeMap<String, BTreeMap<String, String>>;

/// Parses `path` and everything it (transitively) includes via
/// `[base] includes = ...`, merging into `ast`. Later files win over earlier
/// ones; a file already fully merged is skipped (the include graph collapses
/// to a DAG), and a file that is still being processed higher up the stack
/// is a genuine cycle.
pub fn merge_file(ast: &mut Ast, path: &Path) -> Result<()> {
    let mut stack = Vec::new();
    let mut done = HashSet::new();
    merge_file_inner(ast, path, &mut stack, &mut done)
}

fn merge_file_inner(
    ast: &mut Ast,
    path: &Path,
    stack: &mut Vec<PathBuf>,
    done: &mut HashSet<PathBuf>,
) -> Result<()> {
    let canon = path
        .canonicalize()
        .map_err(|_| Error::ConfigNotFound(path.to_path_buf()))?;

    if stack.contains(&canon) {
        return Err(Error::IncludeCycle(path.to_path_buf()));
    }
    if done.contains(&canon) {
        return Ok(());
    }

    let text = std::fs::read_to_string(&canon)?;
    let raw = parse_ini(&text);

    stack.push(canon.clone());

    if let Some(includes) = raw.get("base").and_then(|s| s.get("includes")) {
        let base_dir = canon.parent().unwrap_or_else(|| Path::new("."));
        for entry in split_list(includes) {
            let inc_path = resolve_include_path(base_dir, &entry);
            merge_file_inner(ast, &inc_path, stack, done)?;
        }
    }

    for (section, entries) in raw {
        let dst = ast.entry(section).or_default();
        for (key, value) in entries {
            dst.insert(key, value);
        }
    }

    stack.pop();
    done.insert(canon);
    Ok(())
}

fn resolve_include_path(base_dir: &Path, entry: &str) -> PathBuf {
    let candidate = Path::new(entry);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base_dir.join(candidate)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Parses one file's worth of text into an (unmerged) section → key → value
/// map, joining backtick-newline continuations before splitting into lines.
fn parse_ini(text: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let joined = join_continuations(text);

    let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut current = String::new();

    for line in joined.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            current = name.trim().to_owned();
            sections.entry(current.clone()).or_default();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if current.is_empty() {
                continue;
            }
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_owned(), value.trim().to_owned());
        }
    }

    sections
}

/// Joins a trailing backtick immediately followed by a newline with the next
/// physical line, with no separator inserted — the continuation idiom shared
/// by the distribution templates.
fn join_continuations(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '`' {
            if chars.peek() == Some(&'\n') {
                chars.next();
                continue;
            }
            if chars.peek() == Some(&'\r') {
                chars.next();
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}
