//! Bounded, sandboxed directory traversal.
//!
//! [`SecureScanner`] walks a directory tree rooted at a single scan root and
//! emits one [`ScanRecord`] per accepted file. All directory access goes
//! through a [`SandboxRoot`], so a symlink can never lead the walk outside
//! the root, and every symlink encountered is additionally checked with
//! [`validate_symlink_security`] against the root.
//!
//! # Filtering
//!
//! | Entry | Rules applied, in order |
//! |-------|-------------------------|
//! | directory | hidden prefix (unless `include_hidden`), exact `skip_patterns` match, `dir_filter`, symlink security |
//! | file | hidden prefix (unless `include_hidden`), `file_filter`, symlink security, optional access check |
//!
//! A directory named in `skip_patterns` is skipped even when
//! `include_hidden` is true.

use std::collections::HashSet;
use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::path_guard::{self, clean_path};
use crate::sandbox::{SandboxEntry, SandboxRoot};
use crate::symlink::validate_symlink_security;

pub const DEFAULT_MAX_DEPTH: usize = 20;

/// Predicate over `(entry name, root-relative path)`.
pub type EntryFilter = Arc<dyn Fn(&str, &Path) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ScanOptions {
    pub skip_unreadable_dirs: bool,
    pub max_depth: usize,
    pub include_hidden: bool,
    pub skip_patterns: Vec<String>,
    pub file_filter: Option<EntryFilter>,
    pub dir_filter: Option<EntryFilter>,
    pub validate_file_access: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            skip_unreadable_dirs: true,
            max_depth: DEFAULT_MAX_DEPTH,
            include_hidden: true,
            skip_patterns: Vec::new(),
            file_filter: None,
            dir_filter: None,
            validate_file_access: false,
        }
    }
}

impl fmt::Debug for ScanOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanOptions")
            .field("skip_unreadable_dirs", &self.skip_unreadable_dirs)
            .field("max_depth", &self.max_depth)
            .field("include_hidden", &self.include_hidden)
            .field("skip_patterns", &self.skip_patterns)
            .field("file_filter", &self.file_filter.is_some())
            .field("dir_filter", &self.dir_filter.is_some())
            .field("validate_file_access", &self.validate_file_access)
            .finish()
    }
}

/// A file accepted by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub name: String,
    /// Relative to the scan root.
    pub relative_path: PathBuf,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub mode: u32,
}

pub struct SecureScanner {
    sandbox: SandboxRoot,
    options: ScanOptions,
    logger: Arc<dyn Logger>,
}

impl SecureScanner {
    /// Bind a scanner to `root`, which must pass path security checks and
    /// exist as a directory.
    pub fn new(root: &Path, options: ScanOptions, logger: Arc<dyn Logger>) -> Result<Self> {
        path_guard::validate_path_security(&root.to_string_lossy())?;
        let sandbox = SandboxRoot::open(root)?;
        logger.debug(&format!("scanner bound to {}", sandbox.root().display()));
        Ok(Self {
            sandbox,
            options,
            logger,
        })
    }

    /// Canonical scan root.
    pub fn root(&self) -> &Path {
        self.sandbox.root()
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn scan(&self) -> Result<Vec<ScanRecord>> {
        self.run(None)
    }

    /// As [`scan`](Self::scan), checking `token` before every entry.
    pub fn scan_cancellable(&self, token: &CancellationToken) -> Result<Vec<ScanRecord>> {
        self.run(Some(token))
    }

    /// Release the sandbox handle. Later scans fail with `ScannerClosed`.
    pub fn close(&self) {
        self.sandbox.close();
    }

    fn run(&self, token: Option<&CancellationToken>) -> Result<Vec<ScanRecord>> {
        if self.sandbox.is_closed() {
            return Err(Error::ScannerClosed);
        }
        let mut walk = Walk {
            scanner: self,
            token,
            visited: HashSet::new(),
            records: Vec::new(),
        };
        walk.directory(Path::new("."), 0)?;
        self.logger.debug(&format!(
            "scanned {}: {} files",
            self.root().display(),
            walk.records.len()
        ));
        Ok(walk.records)
    }
}

impl Drop for SecureScanner {
    fn drop(&mut self) {
        self.sandbox.close();
    }
}

/// State for one traversal.
struct Walk<'a> {
    scanner: &'a SecureScanner,
    token: Option<&'a CancellationToken>,
    visited: HashSet<PathBuf>,
    records: Vec<ScanRecord>,
}

impl Walk<'_> {
    fn options(&self) -> &ScanOptions {
        &self.scanner.options
    }

    /// Swallow `err` under the skip policy, otherwise return it.
    fn tolerate(&self, err: Error, context: &Path) -> Result<()> {
        if err.is_canceled() || !self.options().skip_unreadable_dirs {
            return Err(err);
        }
        self.scanner
            .logger
            .debug(&format!("skipping {}: {}", context.display(), err));
        Ok(())
    }

    fn directory(&mut self, relative: &Path, depth: usize) -> Result<()> {
        let key = clean_path(relative);
        // A directory reached through several links is walked once.
        let canonical = match self.scanner.sandbox.resolve(&key) {
            Ok(path) => path,
            Err(e) => return self.tolerate(e, &key),
        };
        if !self.visited.insert(canonical) {
            return Ok(());
        }

        let entries = match self.scanner.sandbox.read_dir(&key) {
            Ok(entries) => entries,
            Err(e) => return self.tolerate(e, &key),
        };

        for entry in entries {
            if self.token.is_some_and(|t| t.is_cancelled()) {
                return Err(Error::Canceled);
            }
            if let Err(e) = self.entry(&entry, depth) {
                self.tolerate(e, &entry.relative_path)?;
            }
        }
        Ok(())
    }

    fn entry(&mut self, entry: &SandboxEntry, depth: usize) -> Result<()> {
        let is_dir = if entry.is_symlink() {
            // Classify by the link target; a dangling link is a stat failure.
            let target = self.scanner.root().join(&entry.relative_path);
            std::fs::metadata(&target)
                .map_err(|e| Error::io("stat", &target, e))?
                .is_dir()
        } else {
            entry.file_type.is_dir()
        };

        if is_dir {
            self.child_directory(entry, depth)
        } else {
            self.file(entry)
        }
    }

    fn hidden_excluded(&self, name: &str) -> bool {
        !self.options().include_hidden && name.starts_with('.')
    }

    fn check_link(&self, entry: &SandboxEntry) -> Result<()> {
        if entry.is_symlink() {
            let root = self.scanner.root().to_path_buf();
            validate_symlink_security(&root.join(&entry.relative_path), &[root])?;
        }
        Ok(())
    }

    fn child_directory(&mut self, entry: &SandboxEntry, depth: usize) -> Result<()> {
        let name = entry.name.as_str();
        if self.hidden_excluded(name) || self.options().skip_patterns.iter().any(|p| p == name) {
            return Ok(());
        }
        if let Some(filter) = &self.options().dir_filter {
            if !filter(name, &entry.relative_path) {
                return Ok(());
            }
        }
        self.check_link(entry)?;

        if depth + 1 > self.options().max_depth {
            return Ok(());
        }
        self.directory(&entry.relative_path, depth + 1)
    }

    fn file(&mut self, entry: &SandboxEntry) -> Result<()> {
        let name = entry.name.as_str();
        if self.hidden_excluded(name) {
            return Ok(());
        }
        if let Some(filter) = &self.options().file_filter {
            if !filter(name, &entry.relative_path) {
                return Ok(());
            }
        }
        self.check_link(entry)?;

        let meta = self.scanner.sandbox.metadata(&entry.relative_path)?;
        if self.options().validate_file_access {
            self.scanner.sandbox.open_file(&entry.relative_path)?;
        }

        self.records.push(ScanRecord {
            name: name.to_string(),
            relative_path: entry.relative_path.clone(),
            is_dir: false,
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            mode: file_mode(&meta),
        });
        Ok(())
    }
}

#[cfg(unix)]
fn file_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(meta: &Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::null_logger;
    use std::fs;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    fn paths(records: &[ScanRecord]) -> Vec<String> {
        records
            .iter()
            .map(|r| r.relative_path.to_string_lossy().replace('\\', "/"))
            .collect()
    }

    #[test]
    fn scans_recursively_in_name_order() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "b.md");
        touch(tmp.path(), "a/z.md");
        touch(tmp.path(), "a/b/c.md");

        let scanner = SecureScanner::new(tmp.path(), ScanOptions::default(), null_logger()).unwrap();
        let records = scanner.scan().unwrap();
        assert_eq!(paths(&records), vec!["a/b/c.md", "a/z.md", "b.md"]);
        assert!(records.iter().all(|r| !r.is_dir && r.size == 1));
    }

    #[test]
    fn depth_cap_limits_separators() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "top.md");
        touch(tmp.path(), "one/one.md");
        touch(tmp.path(), "one/two/two.md");

        let options = ScanOptions {
            max_depth: 1,
            ..Default::default()
        };
        let scanner = SecureScanner::new(tmp.path(), options, null_logger()).unwrap();
        let got = paths(&scanner.scan().unwrap());
        assert_eq!(got, vec!["one/one.md", "top.md"]);
        assert!(got.iter().all(|p| p.matches('/').count() <= 1));
    }

    #[test]
    fn hidden_and_skip_patterns() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), ".hidden/h.md");
        touch(tmp.path(), ".dot.md");
        touch(tmp.path(), ".git/config");
        touch(tmp.path(), "keep/k.md");

        let options = ScanOptions {
            include_hidden: true,
            skip_patterns: vec![".git".to_string()],
            ..Default::default()
        };
        let scanner = SecureScanner::new(tmp.path(), options, null_logger()).unwrap();
        assert_eq!(
            paths(&scanner.scan().unwrap()),
            vec![".dot.md", ".hidden/h.md", "keep/k.md"]
        );

        let options = ScanOptions {
            include_hidden: false,
            ..Default::default()
        };
        let scanner = SecureScanner::new(tmp.path(), options, null_logger()).unwrap();
        assert_eq!(paths(&scanner.scan().unwrap()), vec!["keep/k.md"]);
    }

    #[test]
    fn filters_apply() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "a.md");
        touch(tmp.path(), "b.txt");
        touch(tmp.path(), "skipme/c.md");

        let options = ScanOptions {
            file_filter: Some(Arc::new(|name: &str, _: &Path| name.ends_with(".md"))),
            dir_filter: Some(Arc::new(|name: &str, _: &Path| name != "skipme")),
            ..Default::default()
        };
        let scanner = SecureScanner::new(tmp.path(), options, null_logger()).unwrap();
        assert_eq!(paths(&scanner.scan().unwrap()), vec!["a.md"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_out_of_root_are_never_followed() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        touch(outside.path(), "secret.md");
        touch(outside.path(), "deep/secret.md");
        touch(tmp.path(), "inside.md");
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("escape")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.md"),
            tmp.path().join("file-link.md"),
        )
        .unwrap();

        let scanner = SecureScanner::new(tmp.path(), ScanOptions::default(), null_logger()).unwrap();
        assert_eq!(paths(&scanner.scan().unwrap()), vec!["inside.md"]);

        let strict = ScanOptions {
            skip_unreadable_dirs: false,
            ..Default::default()
        };
        let scanner = SecureScanner::new(tmp.path(), strict, null_logger()).unwrap();
        assert!(scanner.scan().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn internal_symlink_loops_terminate() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "a/x.md");
        std::os::unix::fs::symlink(tmp.path().join("a"), tmp.path().join("a").join("loop")).unwrap();

        let options = ScanOptions {
            max_depth: 4,
            ..Default::default()
        };
        let scanner = SecureScanner::new(tmp.path(), options, null_logger()).unwrap();
        let records = scanner.scan().unwrap();
        assert!(records.iter().any(|r| r.relative_path == Path::new("a/x.md")));
        assert!(records
            .iter()
            .all(|r| r.relative_path.components().count() <= 5));
    }

    #[cfg(unix)]
    #[test]
    fn links_back_to_root_do_not_repeat_files() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "x.md");
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        for name in ["l0", "l1", "l2"] {
            std::os::unix::fs::symlink(tmp.path(), tmp.path().join("a").join(name)).unwrap();
        }

        let scanner = SecureScanner::new(tmp.path(), ScanOptions::default(), null_logger()).unwrap();
        let records = scanner.scan().unwrap();
        let copies = records.iter().filter(|r| r.name == "x.md").count();
        assert_eq!(copies, 1, "{:?}", paths(&records));
    }

    #[test]
    fn closed_scanner_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let scanner = SecureScanner::new(tmp.path(), ScanOptions::default(), null_logger()).unwrap();
        scanner.close();
        assert!(matches!(scanner.scan(), Err(Error::ScannerClosed)));
    }

    #[test]
    fn cancellation_stops_the_walk() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "a.md");
        let scanner = SecureScanner::new(tmp.path(), ScanOptions::default(), null_logger()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            scanner.scan_cancellable(&token),
            Err(Error::Canceled)
        ));
    }

    #[test]
    fn reserved_root_is_rejected() {
        let err = SecureScanner::new(Path::new("/etc"), ScanOptions::default(), null_logger());
        #[cfg(unix)]
        assert!(matches!(err, Err(Error::Reserved { .. })));
        #[cfg(not(unix))]
        let _ = err;
    }
}
