//! Storage-bound file operations.
//!
//! A [`FileManager`] is bound to one storage directory, validated once at
//! construction, and to a working directory that destinations are resolved
//! against. Every write goes through [`atomic_io`]; every link through
//! [`symlink`]. A destination is "occupied" when `lstat` finds anything
//! there, so a dangling link blocks a write unless `overwrite` is set.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::atomic_io;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::models::{FileItem, RepositoryEntry, CWD_REPOSITORY_ID};
use crate::path_guard;
use crate::rulefile::DEFAULT_MAX_FILE_SIZE;
use crate::sandbox::SandboxRoot;
use crate::scanner::{ScanOptions, SecureScanner};
use crate::symlink;

/// Extensions treated as Markdown, compared case-insensitively.
pub const MARKDOWN_EXTENSIONS: &[&str] = &[".md", ".mdown", ".mkdn", ".mkd", ".markdown", ".mdc"];

/// Directory names never descended into.
pub const DEFAULT_SKIP_PATTERNS: &[&str] = &[
    "node_modules",
    ".git",
    "vendor",
    "target",
    "build",
    ".next",
    "dist",
    ".cache",
    "__pycache__",
    ".vscode",
    ".idea",
];

pub fn is_markdown_file(name: &str) -> bool {
    let lowered = name.to_lowercase();
    MARKDOWN_EXTENSIONS.iter().any(|ext| lowered.ends_with(ext))
}

/// Scanner options used for storage and working-directory scans.
pub fn markdown_scan_options() -> ScanOptions {
    ScanOptions {
        skip_patterns: DEFAULT_SKIP_PATTERNS.iter().map(|s| s.to_string()).collect(),
        file_filter: Some(Arc::new(|name: &str, _: &Path| is_markdown_file(name))),
        validate_file_access: true,
        ..ScanOptions::default()
    }
}

/// Repository fields copied onto every [`FileItem`] from storage.
#[derive(Debug, Clone)]
struct RepositoryLabel {
    id: String,
    name: String,
    kind: String,
}

pub struct FileManager {
    storage: SandboxRoot,
    cwd: PathBuf,
    label: RepositoryLabel,
    cancel: Option<CancellationToken>,
    logger: Arc<dyn Logger>,
}

impl FileManager {
    /// Bind to `storage_dir`, creating it if needed.
    ///
    /// The directory must pass storage-path validation: absolute or `~/`,
    /// not reserved, with an existing parent.
    pub fn new(storage_dir: &str, logger: Arc<dyn Logger>) -> Result<Self> {
        let validated = path_guard::validate_storage_path(storage_dir)?;
        atomic_io::ensure_directory_exists(&validated)?;
        let storage = SandboxRoot::open(&validated)?;
        let cwd = std::env::current_dir().map_err(|e| Error::io("resolve current directory", ".", e))?;

        let name = storage
            .root()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "storage".to_string());
        logger.debug(&format!("file manager bound to {}", storage.root().display()));

        Ok(Self {
            storage,
            cwd,
            label: RepositoryLabel {
                id: "storage".to_string(),
                name,
                kind: "local".to_string(),
            },
            cancel: None,
            logger,
        })
    }

    /// Tag scanned items with this repository.
    pub fn with_repository(mut self, entry: &RepositoryEntry) -> Self {
        self.label = RepositoryLabel {
            id: entry.id.clone(),
            name: entry.name.clone(),
            kind: entry.kind.to_string(),
        };
        self
    }

    /// Resolve destinations and CWD scans against `cwd` instead of the
    /// process working directory.
    pub fn with_cwd(mut self, cwd: &Path) -> Result<Self> {
        self.cwd = path_guard::to_absolute(cwd)?;
        Ok(self)
    }

    /// Abort copies between chunks once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Canonical storage directory.
    pub fn storage_dir(&self) -> &Path {
        self.storage.root()
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn repository_id(&self) -> &str {
        &self.label.id
    }

    pub fn close(&self) {
        self.storage.close();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.storage.is_closed() {
            return Err(Error::ScannerClosed);
        }
        Ok(())
    }

    fn copy(&self, src: &Path, dst: &Path) -> Result<u64> {
        match &self.cancel {
            Some(token) => atomic_io::atomic_copy_cancellable(src, dst, token),
            None => atomic_io::atomic_copy(src, dst),
        }
    }

    /// Copy `src` into storage as `new_name` (sanitized) or its own
    /// basename. Returns the destination path.
    pub fn copy_file_to_storage(
        &self,
        src: &Path,
        new_name: Option<&str>,
        overwrite: bool,
    ) -> Result<PathBuf> {
        self.ensure_open()?;
        path_guard::validate_path_security(&src.to_string_lossy())?;
        path_guard::validate_file_size_limit(src, DEFAULT_MAX_FILE_SIZE)?;
        path_guard::validate_file_access(src)?;

        let file_name = match new_name {
            Some(name) => path_guard::sanitize_filename(name)?,
            None => {
                let base = src
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                path_guard::sanitize_filename(&base)?
            }
        };

        let relative = Path::new(&file_name);
        let dst = self.storage.root().join(relative);
        match self.storage.symlink_metadata(relative) {
            Ok(meta) if meta.is_dir() => return Err(Error::IsDirectory { path: dst }),
            Ok(_) if !overwrite => return Err(Error::Exists { path: dst }),
            Ok(_) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e),
        }

        let bytes = self.copy(src, &dst)?;
        self.logger.info(&format!(
            "copied {} to {} ({} bytes)",
            src.display(),
            dst.display(),
            bytes
        ));
        Ok(dst)
    }

    /// Copy a stored file to a destination relative to the working
    /// directory. Returns the destination path.
    pub fn copy_file_from_storage(
        &self,
        storage_path: &Path,
        dest: &str,
        overwrite: bool,
    ) -> Result<PathBuf> {
        let source = self.stored_file(storage_path)?;
        let dst = self.prepare_destination(dest, overwrite)?;

        let bytes = self.copy(&source, &dst)?;
        self.logger.info(&format!(
            "copied {} to {} ({} bytes)",
            source.display(),
            dst.display(),
            bytes
        ));
        Ok(dst)
    }

    /// Link a destination relative to the working directory to a stored
    /// file. The link is relative, so edits through it land in storage.
    pub fn create_symlink_from_storage(
        &self,
        storage_path: &Path,
        dest: &str,
        overwrite: bool,
    ) -> Result<PathBuf> {
        let source = self.stored_file(storage_path)?;
        let dst = self.prepare_destination(dest, overwrite)?;

        // Build the link beside the destination and rename it into place.
        let staging = atomic_io::temp_path_for(&dst);
        if fs::symlink_metadata(&staging).is_ok() {
            // Only a leftover link from an earlier attempt may be replaced.
            if !symlink::is_symlink(&staging) {
                return Err(Error::Exists { path: staging });
            }
            fs::remove_file(&staging).map_err(|e| Error::io("remove stale link", &staging, e))?;
        }
        symlink::create_relative_symlink(&source, &staging)?;
        if let Err(e) = fs::rename(&staging, &dst) {
            let _ = fs::remove_file(&staging);
            return Err(Error::io("rename link into place", &dst, e));
        }

        self.logger.info(&format!(
            "linked {} -> {}",
            dst.display(),
            source.display()
        ));
        Ok(dst)
    }

    /// Absolute, contained path of a regular file in storage. Accepts a
    /// storage-relative path or an absolute one inside storage.
    fn stored_file(&self, storage_path: &Path) -> Result<PathBuf> {
        self.ensure_open()?;
        let relative = if storage_path.is_absolute() {
            let absolute = path_guard::clean_path(storage_path);
            let resolved = path_guard::resolve_existing_prefix(&absolute);
            absolute
                .strip_prefix(self.storage.root())
                .or_else(|_| resolved.strip_prefix(self.storage.root()))
                .map(Path::to_path_buf)
                .map_err(|_| Error::Containment {
                    path: absolute.clone(),
                    base: self.storage.root().to_path_buf(),
                })?
        } else {
            storage_path.to_path_buf()
        };

        let source = self.storage.resolve(&relative)?;
        path_guard::validate_file_in_directory(&source, self.storage.root())?;
        path_guard::validate_file_size_limit(&source, DEFAULT_MAX_FILE_SIZE)?;
        Ok(source)
    }

    /// Validate `dest`, apply the overwrite rule, and create its parent.
    fn prepare_destination(&self, dest: &str, overwrite: bool) -> Result<PathBuf> {
        let relative = path_guard::validate_cwd_relative(dest)?;
        let dst = self.cwd.join(&relative);

        match fs::symlink_metadata(&dst) {
            Ok(meta) if meta.is_dir() => return Err(Error::IsDirectory { path: dst }),
            Ok(_) if !overwrite => return Err(Error::Exists { path: dst }),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io("lstat", &dst, e)),
        }

        let parent = dst
            .parent()
            .ok_or_else(|| Error::ParentMissing { path: dst.clone() })?;
        path_guard::validate_file_in_directory(parent, &self.cwd)?;
        atomic_io::ensure_directory_exists(parent)?;
        Ok(dst)
    }

    /// Markdown files in storage, tagged with this manager's repository.
    pub fn scan_storage(&self) -> Result<Vec<FileItem>> {
        self.ensure_open()?;
        let root = self.storage.root().to_path_buf();
        self.scan_root(&root, &self.label)
    }

    /// Markdown files under the working directory.
    pub fn scan_cwd(&self) -> Result<Vec<FileItem>> {
        self.ensure_open()?;
        let label = RepositoryLabel {
            id: CWD_REPOSITORY_ID.to_string(),
            name: "Current directory".to_string(),
            kind: CWD_REPOSITORY_ID.to_string(),
        };
        let cwd = self.cwd.clone();
        self.scan_root(&cwd, &label)
    }

    fn scan_root(&self, root: &Path, label: &RepositoryLabel) -> Result<Vec<FileItem>> {
        scan_markdown(
            root,
            ItemSource {
                id: &label.id,
                name: &label.name,
                kind: &label.kind,
            },
            self.logger.clone(),
            self.cancel.as_ref(),
        )
    }

    /// Absolute path of a storage-relative path.
    pub fn storage_absolute_path(&self, relative: &Path) -> Result<PathBuf> {
        self.storage.resolve(relative)
    }

    /// Absolute path of a CWD-relative path. The path must validate as a
    /// CWD-relative destination.
    pub fn cwd_absolute_path(&self, relative: &str) -> Result<PathBuf> {
        Ok(self.cwd.join(path_guard::validate_cwd_relative(relative)?))
    }
}

/// Repository fields stamped onto scanned items.
#[derive(Debug, Clone, Copy)]
pub struct ItemSource<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub kind: &'a str,
}

/// Scan `root` for Markdown files with the standard skip set and convert
/// the records to [`FileItem`]s with absolute paths.
pub fn scan_markdown(
    root: &Path,
    source: ItemSource<'_>,
    logger: Arc<dyn Logger>,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<FileItem>> {
    let scanner = SecureScanner::new(root, markdown_scan_options(), logger)?;
    let records = match cancel {
        Some(token) => scanner.scan_cancellable(token),
        None => scanner.scan(),
    };
    let base = scanner.root().to_path_buf();
    scanner.close();

    Ok(records?
        .into_iter()
        .map(|record| FileItem {
            path: base.join(&record.relative_path),
            name: record.name,
            repository_id: source.id.to_string(),
            repository_name: source.name.to_string(),
            repository_type: source.kind.to_string(),
        })
        .collect())
}

impl Drop for FileManager {
    fn drop(&mut self) {
        self.storage.close();
    }
}

fn is_not_found(err: &Error) -> bool {
    matches!(err, Error::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
}
