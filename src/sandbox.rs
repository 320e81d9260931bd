//! Directory-anchored access.
//!
//! A [`SandboxRoot`] is opened once on a directory and from then on only
//! hands out access to paths that resolve beneath it. Callers pass paths
//! relative to the root. Each operation joins the relative path onto the
//! canonical root, resolves symlinks, and refuses to proceed when the
//! result no longer starts with the root.
//!
//! The handle must be closed by its owner; any operation after
//! [`SandboxRoot::close`] fails with [`Error::ScannerClosed`].

use std::fs::{self, File, FileType, Metadata};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use walkdir::WalkDir;

use crate::atomic_io;
use crate::error::{Error, Result};
use crate::path_guard::{clean_path, resolve_existing_prefix, to_absolute};

/// One entry of a directory listing, not followed if it is a link.
#[derive(Debug, Clone)]
pub struct SandboxEntry {
    pub name: String,
    /// Path relative to the sandbox root.
    pub relative_path: PathBuf,
    pub file_type: FileType,
}

impl SandboxEntry {
    pub fn is_symlink(&self) -> bool {
        self.file_type.is_symlink()
    }
}

#[derive(Debug)]
pub struct SandboxRoot {
    root: PathBuf,
    closed: AtomicBool,
}

impl SandboxRoot {
    /// Open a sandbox on an existing directory.
    pub fn open(root: &Path) -> Result<Self> {
        let absolute = to_absolute(root)?;
        let canonical = absolute
            .canonicalize()
            .map_err(|e| Error::io("open sandbox root", &absolute, e))?;
        let canonical = resolve_existing_prefix(&canonical);
        let meta = fs::metadata(&canonical).map_err(|e| Error::io("stat", &canonical, e))?;
        if !meta.is_dir() {
            return Err(Error::io(
                "open sandbox root",
                &canonical,
                io::Error::other("not a directory"),
            ));
        }
        Ok(Self {
            root: canonical,
            closed: AtomicBool::new(false),
        })
    }

    /// Canonical root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ScannerClosed);
        }
        Ok(())
    }

    /// Lexical join of `relative` onto the root, rejecting absolute input
    /// and any `..` component.
    fn join(&self, relative: &Path) -> Result<PathBuf> {
        self.ensure_open()?;
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || relative.is_absolute() {
            return Err(Error::Containment {
                path: relative.to_path_buf(),
                base: self.root.clone(),
            });
        }
        Ok(clean_path(&self.root.join(relative)))
    }

    fn contain(&self, resolved: PathBuf) -> Result<PathBuf> {
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            Err(Error::Containment {
                path: resolved,
                base: self.root.clone(),
            })
        }
    }

    /// Absolute path for `relative`, with every symlink along it resolved.
    pub fn resolve(&self, relative: &Path) -> Result<PathBuf> {
        let joined = self.join(relative)?;
        self.contain(resolve_existing_prefix(&joined))
    }

    /// Absolute path for `relative` with only its parent resolved, so that
    /// a final link component refers to the link itself.
    fn resolve_entry(&self, relative: &Path) -> Result<PathBuf> {
        let joined = self.join(relative)?;
        match (joined.parent(), joined.file_name()) {
            (Some(parent), Some(name)) if joined != self.root => {
                let parent = self.contain(resolve_existing_prefix(parent))?;
                Ok(parent.join(name))
            }
            _ => Ok(joined),
        }
    }

    /// Single-level listing of a directory, sorted by name.
    pub fn read_dir(&self, relative: &Path) -> Result<Vec<SandboxEntry>> {
        let dir = self.resolve(relative)?;
        let base = clean_path(relative);
        let mut entries = Vec::new();
        for item in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let item = item.map_err(|e| Error::io("read directory", &dir, io::Error::from(e)))?;
            let name = item.file_name().to_string_lossy().to_string();
            let relative_path = if base == Path::new(".") {
                PathBuf::from(&name)
            } else {
                base.join(&name)
            };
            entries.push(SandboxEntry {
                name,
                relative_path,
                file_type: item.file_type(),
            });
        }
        Ok(entries)
    }

    /// `stat`, following links that stay inside the root.
    pub fn metadata(&self, relative: &Path) -> Result<Metadata> {
        let path = self.resolve(relative)?;
        fs::metadata(&path).map_err(|e| Error::io("stat", &path, e))
    }

    /// `lstat` of the entry itself.
    pub fn symlink_metadata(&self, relative: &Path) -> Result<Metadata> {
        let path = self.resolve_entry(relative)?;
        fs::symlink_metadata(&path).map_err(|e| Error::io("lstat", &path, e))
    }

    pub fn open_file(&self, relative: &Path) -> Result<File> {
        let path = self.resolve(relative)?;
        File::open(&path).map_err(|e| Error::io("open", &path, e))
    }

    pub fn create_dir_all(&self, relative: &Path) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        atomic_io::ensure_directory_exists(&path)?;
        Ok(path)
    }

    /// Remove a file, link, or empty directory. Links are removed, not
    /// followed.
    pub fn remove(&self, relative: &Path) -> Result<()> {
        let path = self.resolve_entry(relative)?;
        if path == self.root {
            return Err(Error::InvalidArgument(
                "refusing to remove the sandbox root".to_string(),
            ));
        }
        let meta = fs::symlink_metadata(&path).map_err(|e| Error::io("lstat", &path, e))?;
        let result = if meta.is_dir() {
            fs::remove_dir(&path)
        } else {
            fs::remove_file(&path)
        };
        result.map_err(|e| Error::io("remove", &path, e))
    }
}
