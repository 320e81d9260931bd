//! Symlink creation, inspection and validation.
//!
//! Links created here are either relative (the default used when a stored
//! rule file is linked into a project) or absolute. Every operation that
//! reads a link uses `lstat` semantics so that a link is never silently
//! followed where the caller asked about the link itself.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::atomic_io;
use crate::error::{Error, Result};
use crate::path_guard::{resolve_existing_prefix, to_absolute};

/// Upper bound on links followed while resolving a chain.
const MAX_LINK_HOPS: usize = 40;

/// Create a symlink at `link_path` whose stored target is the path of
/// `target` relative to the link's parent directory.
pub fn create_relative_symlink(target: &Path, link_path: &Path) -> Result<()> {
    let (target_abs, link_abs) = prepare_link(target, link_path)?;
    let link_dir = link_abs
        .parent()
        .ok_or_else(|| Error::symlink(&link_abs, "link has no parent directory"))?;
    let link_dir = resolve_existing_prefix(link_dir);
    let target_resolved = resolve_existing_prefix(&target_abs);

    let relative = relative_path(&link_dir, &target_resolved).ok_or_else(|| {
        Error::symlink(
            &link_abs,
            format!("no relative path to {}", target_resolved.display()),
        )
    })?;
    make_link(&relative, &target_abs, &link_abs)
}

/// Create a symlink at `link_path` storing the absolute path of `target`.
pub fn create_absolute_symlink(target: &Path, link_path: &Path) -> Result<()> {
    let (target_abs, link_abs) = prepare_link(target, link_path)?;
    make_link(&target_abs, &target_abs, &link_abs)
}

fn prepare_link(target: &Path, link_path: &Path) -> Result<(PathBuf, PathBuf)> {
    let target_abs = to_absolute(target)?;
    if fs::metadata(&target_abs).is_err() {
        return Err(Error::TargetMissing { path: target_abs });
    }
    let link_abs = to_absolute(link_path)?;
    if let Some(parent) = link_abs.parent() {
        atomic_io::ensure_directory_exists(parent)?;
    }
    Ok((target_abs, link_abs))
}

#[cfg(unix)]
fn make_link(contents: &Path, _target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(contents, link).map_err(|e| Error::io("create symlink", link, e))
}

#[cfg(windows)]
fn make_link(contents: &Path, target: &Path, link: &Path) -> Result<()> {
    let result = if target.is_dir() {
        std::os::windows::fs::symlink_dir(contents, link)
    } else {
        std::os::windows::fs::symlink_file(contents, link)
    };
    result.map_err(|e| Error::io("create symlink", link, e))
}

/// Path from directory `from` to `to`, both absolute and cleaned.
///
/// Returns `None` when the two share no root (e.g. different drives).
pub fn relative_path(from: &Path, to: &Path) -> Option<PathBuf> {
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();

    match (from.first(), to.first()) {
        (Some(a), Some(b)) if a == b => {}
        _ => return None,
    }

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &to[common..] {
        relative.push(component.as_os_str());
    }
    if relative.as_os_str().is_empty() {
        relative.push(".");
    }
    Some(relative)
}

/// `lstat`-based test; a dangling link is still a link.
pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// The stored link target, verbatim. May be relative.
pub fn read_symlink_target(path: &Path) -> Result<PathBuf> {
    if !is_symlink(path) {
        return Err(Error::symlink(path, "not a symbolic link"));
    }
    fs::read_link(path).map_err(|e| Error::io("read symlink", path, e))
}

/// Follow a chain of links to its final, existing target.
///
/// Fails on cycles, on chains longer than 40 hops, and on dangling targets.
/// A path that is not a link resolves to its own canonical form.
pub fn resolve_symlink(path: &Path) -> Result<PathBuf> {
    let mut current = to_absolute(path)?;
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for _ in 0..MAX_LINK_HOPS {
        let meta = fs::symlink_metadata(&current).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::symlink(
                path,
                format!("broken link: {} does not exist", current.display()),
            ),
            _ => Error::io("stat", &current, e),
        })?;

        if !meta.file_type().is_symlink() {
            return current
                .canonicalize()
                .map(|p| resolve_existing_prefix(&p))
                .map_err(|e| Error::io("canonicalize", &current, e));
        }

        if !seen.insert(current.clone()) {
            return Err(Error::symlink(path, "symlink loop detected"));
        }

        let stored = fs::read_link(&current).map_err(|e| Error::io("read symlink", &current, e))?;
        current = if stored.is_absolute() {
            link_location(&stored)
        } else {
            let parent = current.parent().unwrap_or_else(|| Path::new("/"));
            link_location(&parent.join(stored))
        };
    }

    Err(Error::symlink(
        path,
        format!("more than {} links in chain", MAX_LINK_HOPS),
    ))
}

/// Where a stored target points, with every parent directory resolved on
/// disk. `..` is never folded lexically, so it leaves the directory the
/// link physically lives in.
fn link_location(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => resolve_existing_prefix(parent).join(name),
        _ => resolve_existing_prefix(path),
    }
}

/// Require `link_path` to be a link whose resolved target lies under one of
/// `allowed_bases`. Returns the resolved target.
pub fn validate_symlink_security(link_path: &Path, allowed_bases: &[PathBuf]) -> Result<PathBuf> {
    if !is_symlink(link_path) {
        return Err(Error::symlink(link_path, "not a symbolic link"));
    }
    let target = resolve_symlink(link_path)?;

    let bases: Vec<PathBuf> = allowed_bases
        .iter()
        .filter_map(|b| to_absolute(b).ok())
        .map(|b| resolve_existing_prefix(&b))
        .collect();

    if bases.iter().any(|base| target.starts_with(base)) {
        return Ok(target);
    }

    Err(Error::Containment {
        path: target,
        base: bases
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("<none>")),
    })
}

/// Unlink a symlink. Refuses anything that is not a link.
pub fn remove_symlink(path: &Path) -> Result<()> {
    if !is_symlink(path) {
        return Err(Error::symlink(path, "refusing to remove a non-symlink"));
    }
    remove_link_entry(path)
}

#[cfg(unix)]
fn remove_link_entry(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| Error::io("remove symlink", path, e))
}

#[cfg(windows)]
fn remove_link_entry(path: &Path) -> Result<()> {
    // Directory links on Windows are removed with remove_dir.
    fs::remove_file(path)
        .or_else(|_| fs::remove_dir(path))
        .map_err(|e| Error::io("remove symlink", path, e))
}
