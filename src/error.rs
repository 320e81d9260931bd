//! Error taxonomy for the file-operations kernel.
//!
//! Every kernel operation returns [`Result`]. Each [`Error`] variant belongs
//! to exactly one [`ErrorKind`], which is what callers branch on: the rule
//! file processor downgrades `Validation`/`Containment`/`Symlink`/`Parse`
//! failures to "skip this file", the CLI maps kinds to exit codes, and the
//! MCP bridge maps them to JSON-RPC error codes.
//!
//! Outer layers (CLI, MCP server) use `anyhow` and wrap these errors with
//! context; the kernel never does.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error category used for propagation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Path, filename, identifier, content or size rejected.
    Validation,
    /// File or repository does not exist.
    NotFound,
    /// Destination already occupied and overwrite was not requested.
    Exists,
    /// Permission denied or read-only filesystem.
    Access,
    /// Generic filesystem failure.
    Io,
    /// A path attempted to escape its base directory.
    Containment,
    /// Broken link, link loop, or link into a reserved location.
    Symlink,
    /// YAML or frontmatter could not be parsed.
    Parse,
    /// Cooperative cancellation.
    Canceled,
    /// `git` or editor failure.
    External,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Exists => "exists",
            ErrorKind::Access => "access",
            ErrorKind::Io => "io",
            ErrorKind::Containment => "containment",
            ErrorKind::Symlink => "symlink",
            ErrorKind::Parse => "parse",
            ErrorKind::Canceled => "canceled",
            ErrorKind::External => "external",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("path is empty")]
    EmptyPath,

    #[error("path contains directory traversal: {path}")]
    Traversal { path: String },

    #[error("path must be absolute or start with ~/: {path}")]
    NotAbsoluteOrHome { path: String },

    #[error("path must be relative to the current directory: {path}")]
    NotRelative { path: String },

    #[error("path is inside a reserved system directory: {}", path.display())]
    Reserved { path: PathBuf },

    #[error("path is outside the home directory: {}", path.display())]
    OutsideHome { path: PathBuf },

    #[error("home directory could not be determined")]
    HomeUnavailable,

    #[error("parent directory does not exist: {}", path.display())]
    ParentMissing { path: PathBuf },

    #[error("parent directory is not accessible: {}", path.display())]
    ParentInaccessible { path: PathBuf },

    #[error("target does not exist: {}", path.display())]
    TargetMissing { path: PathBuf },

    #[error("not a regular file: {}", path.display())]
    NotAFile { path: PathBuf },

    #[error("path is a directory: {}", path.display())]
    IsDirectory { path: PathBuf },

    #[error("file {} is {size} bytes, limit is {limit}", path.display())]
    SizeExceeded { path: PathBuf, size: u64, limit: u64 },

    #[error("invalid filename '{name}': {reason}")]
    InvalidFilename { name: String, reason: &'static str },

    #[error("invalid identifier '{input}': {reason}")]
    InvalidIdentifier { input: String, reason: &'static str },

    #[error("content rejected: {reason}")]
    MaliciousContent { reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("{field} is {len} characters, limit is {limit}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("{} escapes {}", path.display(), base.display())]
    Containment { path: PathBuf, base: PathBuf },

    #[error("destination already exists: {}", path.display())]
    Exists { path: PathBuf },

    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("symlink {}: {reason}", path.display())]
    Symlink { path: PathBuf, reason: String },

    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },

    #[error("no configuration at {}; first run setup required", path.display())]
    FirstRunRequired { path: PathBuf },

    #[error("scanner has been closed")]
    ScannerClosed,

    #[error("operation canceled")]
    Canceled,

    #[error("{command} failed: {message}")]
    External { command: String, message: String },

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Wrap an I/O error with the failed operation and the path involved.
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn symlink(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::Symlink {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn parse(what: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Parse {
            what: what.into(),
            message: message.to_string(),
        }
    }

    pub fn external(command: impl Into<String>, message: impl Into<String>) -> Self {
        Error::External {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EmptyPath
            | Error::Traversal { .. }
            | Error::NotAbsoluteOrHome { .. }
            | Error::NotRelative { .. }
            | Error::Reserved { .. }
            | Error::OutsideHome { .. }
            | Error::HomeUnavailable
            | Error::ParentMissing { .. }
            | Error::ParentInaccessible { .. }
            | Error::NotAFile { .. }
            | Error::IsDirectory { .. }
            | Error::SizeExceeded { .. }
            | Error::InvalidFilename { .. }
            | Error::InvalidIdentifier { .. }
            | Error::MaliciousContent { .. }
            | Error::InvalidArgument(_)
            | Error::MissingField { .. }
            | Error::FieldTooLong { .. }
            | Error::ScannerClosed => ErrorKind::Validation,
            Error::TargetMissing { .. } | Error::NotFound { .. } | Error::FirstRunRequired { .. } => {
                ErrorKind::NotFound
            }
            Error::Containment { .. } => ErrorKind::Containment,
            Error::Exists { .. } => ErrorKind::Exists,
            Error::Symlink { .. } => ErrorKind::Symlink,
            Error::Parse { .. } => ErrorKind::Parse,
            Error::Canceled => ErrorKind::Canceled,
            Error::External { .. } => ErrorKind::External,
            Error::Io { source, .. } => match source.kind() {
                io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                    ErrorKind::Access
                }
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                _ => ErrorKind::Io,
            },
        }
    }

    pub fn is_first_run(&self) -> bool {
        matches!(self, Error::FirstRunRequired { .. })
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled)
    }

    /// Remediation hint shown under the error message, where one exists.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::Reserved { .. } => Some(
                "choose a directory under your home directory; system and credential directories cannot hold rule files",
            ),
            Error::OutsideHome { .. } => {
                Some("configuration must live under your home directory; set RULEM_CONFIG_PATH to a path inside it")
            }
            Error::External { command, message }
                if command.starts_with("git") && message.contains("uncommitted") =>
            {
                Some("commit or stash the local changes in the repository clone, then retry")
            }
            Error::Exists { .. } => Some("pass --overwrite to replace the existing destination"),
            Error::FirstRunRequired { .. } => Some("run `rulem init` to create a configuration"),
            _ => None,
        }
    }
}
