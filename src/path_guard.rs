//! Path security checks.
//!
//! Every path that enters the kernel from a user, a config file, or a rule
//! repository passes through one of these functions first. They are pure
//! apart from the filesystem lookups needed to resolve symlinks and to stat
//! parent directories.
//!
//! # Reserved directories
//!
//! A path is *reserved* when it lies under a system-owned or
//! credential-holding directory (see [`reserved_table`]). Matching is a
//! component-wise prefix test performed on both the lexical and the
//! symlink-resolved form of each side, case-insensitively on hosts whose
//! filesystems are case-insensitive. Paths under the system temp directory
//! are never reserved, and a reserved entry that contains the user's home
//! directory (e.g. `/root` when running as root) does not apply to paths
//! strictly inside that home.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::symlink;

/// System directories that must never hold application data (Unix).
#[cfg(unix)]
const RESERVED_UNIX: &[&str] = &[
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/etc",
    "/boot",
    "/dev",
    "/proc",
    "/sys",
    "/var/log",
    "/var/lib",
    "/var/cache",
    "/root",
];

#[cfg(target_os = "macos")]
const RESERVED_MACOS: &[&str] = &[
    "/System",
    "/Library/System",
    "/Applications",
    "/private/etc",
    "/var/db",
    "/var/root",
];

#[cfg(windows)]
const RESERVED_WINDOWS: &[&str] = &[
    r"C:\Windows",
    r"C:\Program Files",
    r"C:\Program Files (x86)",
    r"C:\System32",
    r"C:\ProgramData\Microsoft",
];

/// Home-relative directories holding credentials.
const USER_CRITICAL: &[&str] = &[".ssh", ".gnupg"];

/// Case-insensitive substrings rejected in rule file content.
pub const MALICIOUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "vbscript:",
    "data:text/html",
    "eval(",
    "exec(",
    "onload=",
    "onerror=",
    "onclick=",
];

const CASE_INSENSITIVE_FS: bool = cfg!(any(target_os = "macos", windows));

/// The user's home directory.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .filter(|h| !h.as_os_str().is_empty())
        .ok_or(Error::HomeUnavailable)
}

/// Replace a leading `~/` with the user's home directory.
///
/// Any other input, including a bare `~` or `~user/...`, is returned as-is.
pub fn expand_home(input: &str) -> Result<PathBuf> {
    if let Some(rest) = input.strip_prefix("~/") {
        return Ok(home_dir()?.join(rest));
    }
    #[cfg(windows)]
    if let Some(rest) = input.strip_prefix("~\\") {
        return Ok(home_dir()?.join(rest));
    }
    Ok(PathBuf::from(input))
}

/// Lexically normalize a path: drop `.` components, fold `name/..` pairs.
///
/// `..` that cannot be folded is kept for relative paths and dropped at the
/// root of absolute ones. An empty result becomes `.`.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }
    parts.iter().map(|c| c.as_os_str()).collect()
}

/// Absolute, cleaned form of `path`, anchored at the current directory.
pub fn to_absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(clean_path(path));
    }
    let cwd = std::env::current_dir().map_err(|e| Error::io("resolve current directory", ".", e))?;
    Ok(clean_path(&cwd.join(path)))
}

/// Canonicalize the longest existing ancestor of `path` and re-attach the
/// remaining components.
///
/// Works for paths that do not exist yet (new destinations) and for broken
/// symlinks, which are kept as their own final component.
pub fn resolve_existing_prefix(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return strip_verbatim(canonical);
    }

    let mut tail: Vec<OsString> = Vec::new();
    let mut current = path;
    while let Some(parent) = current.parent() {
        if let Some(name) = current.file_name() {
            tail.push(name.to_os_string());
        }
        current = parent;
        if let Ok(existing) = current.canonicalize() {
            let mut rebuilt = strip_verbatim(existing);
            for component in tail.iter().rev() {
                rebuilt.push(component);
            }
            return rebuilt;
        }
    }
    path.to_path_buf()
}

#[cfg(windows)]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix(r"\\?\") {
        Some(rest) if !rest.starts_with("UNC") => PathBuf::from(rest),
        _ => path,
    }
}

#[cfg(not(windows))]
fn strip_verbatim(path: PathBuf) -> PathBuf {
    path
}

/// Component-wise prefix test honoring host case sensitivity.
pub fn path_has_prefix(path: &Path, prefix: &Path) -> bool {
    if CASE_INSENSITIVE_FS {
        let p = path.to_string_lossy().to_lowercase();
        let q = prefix.to_string_lossy().to_lowercase();
        Path::new(&p).starts_with(Path::new(&q))
    } else {
        path.starts_with(prefix)
    }
}

/// Reserved directories for this host, user-critical entries first.
pub fn reserved_table() -> Vec<PathBuf> {
    let mut table: Vec<PathBuf> = Vec::new();
    if let Ok(home) = home_dir() {
        table.extend(USER_CRITICAL.iter().map(|d| home.join(d)));
    }
    #[cfg(unix)]
    table.extend(RESERVED_UNIX.iter().map(PathBuf::from));
    #[cfg(target_os = "macos")]
    table.extend(RESERVED_MACOS.iter().map(PathBuf::from));
    #[cfg(windows)]
    table.extend(RESERVED_WINDOWS.iter().map(PathBuf::from));
    table
}

fn temp_prefixes() -> Vec<PathBuf> {
    let system_temp = std::env::temp_dir();
    let mut prefixes = vec![resolve_existing_prefix(&system_temp), system_temp];
    #[cfg(unix)]
    prefixes.push(PathBuf::from("/tmp"));
    #[cfg(target_os = "macos")]
    prefixes.extend(
        ["/private/tmp", "/var/folders", "/private/var/folders"]
            .iter()
            .map(PathBuf::from),
    );
    #[cfg(windows)]
    if let Some(local) = dirs::data_local_dir() {
        prefixes.push(local.join("Temp"));
    }
    prefixes
}

/// Whether `path` lies under the system temp directory or a per-user temp
/// location.
pub fn is_under_temp_dir(path: &Path) -> bool {
    let Ok(absolute) = to_absolute(path) else {
        return false;
    };
    let resolved = resolve_existing_prefix(&absolute);
    let temps = temp_prefixes();
    [absolute, resolved]
        .iter()
        .any(|c| temps.iter().any(|t| path_has_prefix(c, t)))
}

/// Whether `path` lies in a reserved directory.
pub fn is_reserved_directory(path: &Path) -> bool {
    let Ok(absolute) = to_absolute(path) else {
        return false;
    };
    let resolved = resolve_existing_prefix(&absolute);
    let candidates = [absolute, resolved];
    let home = home_dir().ok();

    if let Some(home) = &home {
        for critical in USER_CRITICAL.iter().map(|d| home.join(d)) {
            let forms = [resolve_existing_prefix(&critical), critical];
            if candidates
                .iter()
                .any(|c| forms.iter().any(|f| path_has_prefix(c, f)))
            {
                return true;
            }
        }
    }

    let temps = temp_prefixes();
    if candidates
        .iter()
        .any(|c| temps.iter().any(|t| path_has_prefix(c, t)))
    {
        return false;
    }

    let home_forms: Vec<PathBuf> = home
        .iter()
        .flat_map(|h| [h.clone(), resolve_existing_prefix(h)])
        .collect();
    let strictly_in_home = |c: &Path| {
        home_forms
            .iter()
            .any(|h| path_has_prefix(c, h) && c.components().count() > h.components().count())
    };

    for entry in reserved_table() {
        let forms = [resolve_existing_prefix(&entry), entry];
        for candidate in &candidates {
            for form in &forms {
                if !path_has_prefix(candidate, form) {
                    continue;
                }
                let covers_home = home_forms.iter().any(|h| path_has_prefix(h, form));
                if covers_home && strictly_in_home(candidate) {
                    continue;
                }
                return true;
            }
        }
    }
    false
}

/// Reject empty input, any `..`, and reserved absolute paths.
///
/// Returns the cleaned path.
pub fn validate_path_security(input: &str) -> Result<PathBuf> {
    if input.trim().is_empty() {
        return Err(Error::EmptyPath);
    }
    if input.contains('\0') {
        return Err(Error::InvalidArgument("path contains a NUL byte".to_string()));
    }
    if input.contains("..") {
        return Err(Error::Traversal {
            path: input.to_string(),
        });
    }
    let cleaned = clean_path(Path::new(input));
    if cleaned.to_string_lossy().contains("..") {
        return Err(Error::Traversal {
            path: input.to_string(),
        });
    }
    if cleaned.is_absolute() && is_reserved_directory(&cleaned) {
        return Err(Error::Reserved { path: cleaned });
    }
    Ok(cleaned)
}

/// Validate a destination relative to the current working directory.
pub fn validate_cwd_relative(input: &str) -> Result<PathBuf> {
    if input.trim().is_empty() {
        return Err(Error::EmptyPath);
    }
    if input.contains('\0') {
        return Err(Error::InvalidArgument("path contains a NUL byte".to_string()));
    }
    if input.contains("..") {
        return Err(Error::Traversal {
            path: input.to_string(),
        });
    }
    let path = Path::new(input);
    if path.is_absolute() || path.has_root() {
        return Err(Error::NotRelative {
            path: input.to_string(),
        });
    }
    let cleaned = clean_path(path);
    if cleaned.to_string_lossy().contains("..") {
        return Err(Error::Traversal {
            path: input.to_string(),
        });
    }
    if cleaned == Path::new(".") {
        return Err(Error::InvalidArgument(format!(
            "destination '{}' does not name a file",
            input
        )));
    }
    Ok(cleaned)
}

/// Require `file` to lie under `dir`, lexically and after symlink resolution.
///
/// Returns the absolute form of `file`.
pub fn validate_file_in_directory(file: &Path, dir: &Path) -> Result<PathBuf> {
    let file_abs = to_absolute(file)?;
    let dir_abs = to_absolute(dir)?;
    let dir_resolved = resolve_existing_prefix(&dir_abs);

    let lexically_inside =
        file_abs.starts_with(&dir_abs) || file_abs.starts_with(&dir_resolved);
    if !lexically_inside {
        return Err(Error::Containment {
            path: file_abs,
            base: dir_abs,
        });
    }

    if symlink::is_symlink(&file_abs) {
        let target = symlink::resolve_symlink(&file_abs)?;
        if !target.starts_with(&dir_resolved) {
            return Err(Error::Containment {
                path: target,
                base: dir_abs,
            });
        }
    }

    let file_resolved = resolve_existing_prefix(&file_abs);
    if !file_resolved.starts_with(&dir_resolved) {
        return Err(Error::Containment {
            path: file_resolved,
            base: dir_abs,
        });
    }

    Ok(file_abs)
}

/// Require `input` to lie under the user's home directory.
///
/// Returns the path relative to home, e.g. `~/a/b` → `a/b`.
pub fn validate_path_in_home(input: &str) -> Result<PathBuf> {
    if input.trim().is_empty() {
        return Err(Error::EmptyPath);
    }
    let home = home_dir()?;
    let absolute = to_absolute(&expand_home(input)?)?;

    if let Ok(relative) = absolute.strip_prefix(&home) {
        return Ok(relative.to_path_buf());
    }
    let home_resolved = resolve_existing_prefix(&home);
    let resolved = resolve_existing_prefix(&absolute);
    match resolved.strip_prefix(&home_resolved) {
        Ok(relative) => Ok(relative.to_path_buf()),
        Err(_) => Err(Error::OutsideHome { path: absolute }),
    }
}

/// Validate a directory chosen to hold rule files.
///
/// Order: non-empty, no traversal, absolute or `~/`, symlink target not
/// reserved, path not reserved, parent exists and can be listed.
pub fn validate_storage_path(input: &str) -> Result<PathBuf> {
    if input.trim().is_empty() {
        return Err(Error::EmptyPath);
    }
    if input.contains("..") {
        return Err(Error::Traversal {
            path: input.to_string(),
        });
    }
    let home_relative = input.starts_with("~/") || (cfg!(windows) && input.starts_with("~\\"));
    if !home_relative && !Path::new(input).is_absolute() {
        return Err(Error::NotAbsoluteOrHome {
            path: input.to_string(),
        });
    }
    let path = clean_path(&expand_home(input)?);

    if symlink::is_symlink(&path) {
        if let Ok(target) = symlink::resolve_symlink(&path) {
            if is_reserved_directory(&target) {
                return Err(Error::Reserved { path: target });
            }
        }
    }
    if is_reserved_directory(&path) {
        return Err(Error::Reserved { path });
    }

    let parent = path
        .parent()
        .ok_or_else(|| Error::ParentMissing { path: path.clone() })?;
    match fs::metadata(parent) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(Error::ParentInaccessible {
                path: parent.to_path_buf(),
            })
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::ParentMissing {
                path: parent.to_path_buf(),
            })
        }
        Err(_) => {
            return Err(Error::ParentInaccessible {
                path: parent.to_path_buf(),
            })
        }
    }
    if fs::read_dir(parent).is_err() {
        return Err(Error::ParentInaccessible {
            path: parent.to_path_buf(),
        });
    }

    Ok(path)
}

/// Reduce user input to a safe base filename.
pub fn sanitize_filename(input: &str) -> Result<String> {
    let invalid = |reason| Error::InvalidFilename {
        name: input.to_string(),
        reason,
    };

    let trimmed = input.trim();
    let base = Path::new(trimmed)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| invalid("no file name component"))?;
    let cleaned = base.replace("..", "");
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(invalid("empty after sanitization"));
    }
    if cleaned.contains('/') || cleaned.contains('\\') {
        return Err(invalid("contains a path separator"));
    }
    if cleaned.contains('\0') {
        return Err(invalid("contains a NUL byte"));
    }
    Ok(cleaned.to_string())
}

/// Reduce input to `[A-Za-z0-9._]`, with runs of whitespace, `-` and `_`
/// collapsed to a single `_` and trimmed from both ends.
pub fn sanitize_identifier(input: &str, max_len: usize) -> Result<String> {
    if max_len == 0 {
        return Err(Error::InvalidArgument(
            "identifier length cap must be positive".to_string(),
        ));
    }

    let mut out = String::with_capacity(input.len());
    let mut pending_separator = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() || c == '.' {
            if pending_separator && !out.is_empty() {
                out.push('_');
            }
            pending_separator = false;
            out.push(c);
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_separator = true;
        }
    }

    out.truncate(max_len);
    let trimmed = out.trim_end_matches('_');
    if trimmed.is_empty() {
        return Err(Error::InvalidIdentifier {
            input: input.to_string(),
            reason: "empty after sanitization",
        });
    }
    Ok(trimmed.to_string())
}

/// Reject control characters (other than tab, CR, LF), NUL bytes, and
/// script-injection patterns.
pub fn validate_content_security(content: &str) -> Result<()> {
    if content.contains('\0') {
        return Err(Error::MaliciousContent {
            reason: "contains a NUL byte".to_string(),
        });
    }
    if let Some(c) = content
        .chars()
        .find(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        return Err(Error::MaliciousContent {
            reason: format!("contains control character U+{:04X}", c as u32),
        });
    }
    let lowered = content.to_lowercase();
    if let Some(pattern) = MALICIOUS_PATTERNS.iter().find(|p| lowered.contains(*p)) {
        return Err(Error::MaliciousContent {
            reason: format!("contains '{}'", pattern),
        });
    }
    Ok(())
}

/// Stat `path` and require a regular file of at most `max_bytes`.
///
/// Returns the file size.
pub fn validate_file_size_limit(path: &Path, max_bytes: u64) -> Result<u64> {
    if max_bytes == 0 {
        return Err(Error::InvalidArgument(
            "file size limit must be positive".to_string(),
        ));
    }
    let meta = fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::TargetMissing {
            path: path.to_path_buf(),
        },
        _ => Error::io("stat", path, e),
    })?;
    if meta.is_dir() {
        return Err(Error::IsDirectory {
            path: path.to_path_buf(),
        });
    }
    if !meta.is_file() {
        return Err(Error::NotAFile {
            path: path.to_path_buf(),
        });
    }
    if meta.len() > max_bytes {
        return Err(Error::SizeExceeded {
            path: path.to_path_buf(),
            size: meta.len(),
            limit: max_bytes,
        });
    }
    Ok(meta.len())
}

/// Check read access by opening the file.
pub fn validate_file_access(path: &Path) -> Result<()> {
    fs::File::open(path)
        .map(|_| ())
        .map_err(|e| Error::io("open for reading", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn traversal_is_rejected() {
        for input in [
            "../../../etc/passwd",
            "valid/../../etc",
            "..\\..\\Windows\\System32",
            "..%2F..%2Fetc",
            "a/..",
        ] {
            let err = validate_path_security(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "input {}", input);
            assert!(matches!(err, Error::Traversal { .. }), "input {}", input);
        }
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(matches!(validate_path_security("   "), Err(Error::EmptyPath)));
        assert!(matches!(validate_cwd_relative(""), Err(Error::EmptyPath)));
    }

    #[test]
    fn clean_path_folds_components() {
        assert_eq!(clean_path(Path::new("a/./b//c")), PathBuf::from("a/b/c"));
        assert_eq!(clean_path(Path::new("a/b/../c")), PathBuf::from("a/c"));
        assert_eq!(clean_path(Path::new("a/../..")), PathBuf::from(".."));
        assert_eq!(clean_path(Path::new("./")), PathBuf::from("."));
        #[cfg(unix)]
        assert_eq!(clean_path(Path::new("/../etc")), PathBuf::from("/etc"));
    }

    #[cfg(unix)]
    #[test]
    fn reserved_entries_are_rejected_as_storage() {
        for entry in RESERVED_UNIX {
            let err = validate_storage_path(entry).unwrap_err();
            assert!(matches!(err, Error::Reserved { .. }), "entry {}", entry);
        }
        let err = validate_storage_path("/etc/rulem").unwrap_err();
        assert!(matches!(err, Error::Reserved { .. }));
    }

    #[test]
    fn user_critical_directories_are_reserved() {
        let home = home_dir().unwrap();
        assert!(is_reserved_directory(&home.join(".ssh")));
        assert!(is_reserved_directory(&home.join(".gnupg").join("keys")));
    }

    #[test]
    fn temp_directory_is_accepted() {
        let candidate = std::env::temp_dir().join("x");
        let validated = validate_storage_path(&candidate.to_string_lossy()).unwrap();
        assert_eq!(validated, clean_path(&candidate));
    }

    #[test]
    fn storage_path_must_be_absolute_or_home() {
        assert!(matches!(
            validate_storage_path("relative/dir"),
            Err(Error::NotAbsoluteOrHome { .. })
        ));
    }

    #[test]
    fn storage_path_parent_must_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope").join("store");
        assert!(matches!(
            validate_storage_path(&missing.to_string_lossy()),
            Err(Error::ParentMissing { .. })
        ));
    }

    #[test]
    fn path_in_home() {
        assert_eq!(validate_path_in_home("~/a/b").unwrap(), PathBuf::from("a/b"));
        let err = validate_path_in_home("/etc/passwd").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn cwd_relative_destinations() {
        assert_eq!(
            validate_cwd_relative(".github/copilot-instructions.md").unwrap(),
            PathBuf::from(".github/copilot-instructions.md")
        );
        assert_eq!(
            validate_cwd_relative("./docs/x.md").unwrap(),
            PathBuf::from("docs/x.md")
        );
        assert!(matches!(
            validate_cwd_relative("/etc/passwd"),
            Err(Error::NotRelative { .. })
        ));
        assert!(matches!(
            validate_cwd_relative("docs/../../x"),
            Err(Error::Traversal { .. })
        ));
        assert!(validate_cwd_relative(".").is_err());
    }

    #[test]
    fn file_in_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let inside = tmp.path().join("a.md");
        fs::write(&inside, "x").unwrap();
        assert!(validate_file_in_directory(&inside, tmp.path()).is_ok());

        let other = tempfile::tempdir().unwrap();
        let outside = other.path().join("b.md");
        fs::write(&outside, "x").unwrap();
        let err = validate_file_in_directory(&outside, tmp.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Containment);
    }

    #[cfg(unix)]
    #[test]
    fn file_in_directory_follows_symlinks() {
        let tmp = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let secret = other.path().join("secret.md");
        fs::write(&secret, "x").unwrap();
        let link = tmp.path().join("link.md");
        std::os::unix::fs::symlink(&secret, &link).unwrap();

        let err = validate_file_in_directory(&link, tmp.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Containment);
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("notes.md").unwrap(), "notes.md");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("dir/rule.md").unwrap(), "rule.md");
        assert_eq!(sanitize_filename("a..b.md").unwrap(), "ab.md");
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename(".").is_err());
        assert!(sanitize_filename("   ").is_err());
        assert!(sanitize_filename("a\\b").is_err());
    }

    #[test]
    fn identifiers_are_sanitized() {
        assert_eq!(
            sanitize_identifier("My Rule--File__x", 100).unwrap(),
            "My_Rule_File_x"
        );
        assert_eq!(sanitize_identifier("  -lead trail- ", 100).unwrap(), "lead_trail");
        assert_eq!(sanitize_identifier("a!@#b", 100).unwrap(), "ab");
        assert_eq!(sanitize_identifier("v1.2", 100).unwrap(), "v1.2");
        assert_eq!(sanitize_identifier("abcdef", 3).unwrap(), "abc");
        assert_eq!(sanitize_identifier("ab cd", 3).unwrap(), "ab");
        assert!(matches!(
            sanitize_identifier(" -_- ", 10),
            Err(Error::InvalidIdentifier { .. })
        ));
        assert!(sanitize_identifier("x", 0).is_err());
    }

    #[test]
    fn content_security() {
        assert!(validate_content_security("# Title\n\tindent\r\n").is_ok());
        for bad in [
            "hello <SCRIPT>alert(1)",
            "click JavaScript:void(0)",
            "vbscript:msgbox",
            "data:text/html;base64,xx",
            "eval(x)",
            "os.exec(cmd)",
            "<img onload=x>",
            "<img ONERROR=x>",
            "<a onclick=x>",
            "bell \u{7}",
            "nul \0",
        ] {
            let err = validate_content_security(bad).unwrap_err();
            assert!(matches!(err, Error::MaliciousContent { .. }), "input {:?}", bad);
        }
    }

    #[test]
    fn file_size_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("big.md");
        fs::write(&file, vec![b'a'; 64]).unwrap();

        assert_eq!(validate_file_size_limit(&file, 64).unwrap(), 64);
        assert!(matches!(
            validate_file_size_limit(&file, 63),
            Err(Error::SizeExceeded { size: 64, limit: 63, .. })
        ));
        assert!(matches!(
            validate_file_size_limit(tmp.path(), 10),
            Err(Error::IsDirectory { .. })
        ));
        assert!(matches!(
            validate_file_size_limit(&tmp.path().join("missing"), 10),
            Err(Error::TargetMissing { .. })
        ));
        assert!(validate_file_size_limit(&file, 0).is_err());
    }

    #[test]
    fn expand_home_only_touches_tilde_slash() {
        let home = home_dir().unwrap();
        assert_eq!(expand_home("~/x/y").unwrap(), home.join("x/y"));
        assert_eq!(expand_home("~other/x").unwrap(), PathBuf::from("~other/x"));
        assert_eq!(expand_home("/abs").unwrap(), PathBuf::from("/abs"));
    }
}
