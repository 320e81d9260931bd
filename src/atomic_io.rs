//! Atomic file writes and directory preparation.
//!
//! Every write the kernel performs lands through [`atomic_copy`]: bytes are
//! streamed into `<dst>.tmp`, synced, and renamed over `dst`. The rename is
//! the only change observable at the destination, so a failed copy leaves
//! the previous file (or link) untouched.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::logging::Logger;

const COPY_BUFFER_SIZE: usize = 64 * 1024;
const WRITE_CHECK_FILE_NAME: &str = ".rulem-write-check";

/// The sibling temp path used while writing `dst`.
pub fn temp_path_for(dst: &Path) -> PathBuf {
    let mut name: OsString = dst.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Removes the temp file unless disarmed after a successful rename.
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Copy `src` to `dst` atomically. Returns the number of bytes copied.
pub fn atomic_copy(src: &Path, dst: &Path) -> Result<u64> {
    copy_inner(src, dst, None)
}

/// As [`atomic_copy`], checking `token` between buffer-sized chunks.
///
/// On cancellation the temp file is removed and `dst` is unchanged.
pub fn atomic_copy_cancellable(src: &Path, dst: &Path, token: &CancellationToken) -> Result<u64> {
    copy_inner(src, dst, Some(token))
}

fn copy_inner(src: &Path, dst: &Path, token: Option<&CancellationToken>) -> Result<u64> {
    let mut reader = File::open(src).map_err(|e| Error::io("open source", src, e))?;

    let tmp = temp_path_for(dst);
    let mut guard = TempGuard {
        path: tmp.clone(),
        armed: true,
    };

    let mut writer = create_file(&tmp, 0o644)?;
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total: u64 = 0;
    loop {
        if token.is_some_and(|t| t.is_cancelled()) {
            return Err(Error::Canceled);
        }
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io("read source", src, e)),
        };
        writer
            .write_all(&buffer[..n])
            .map_err(|e| Error::io("write temp file", &tmp, e))?;
        total += n as u64;
    }

    writer
        .sync_all()
        .map_err(|e| Error::io("sync temp file", &tmp, e))?;
    drop(writer);

    fs::rename(&tmp, dst).map_err(|e| Error::io("rename into place", dst, e))?;
    guard.armed = false;
    Ok(total)
}

/// Create `path` fresh. A stale entry there is unlinked, never followed.
fn create_file(path: &Path, mode: u32) -> Result<File> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            return Err(Error::IsDirectory {
                path: path.to_path_buf(),
            })
        }
        Ok(_) => fs::remove_file(path).map_err(|e| Error::io("remove stale file", path, e))?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io("lstat", path, e)),
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path).map_err(|e| Error::io("create file", path, e))
}

/// `mkdir -p` with mode 0755. Idempotent.
pub fn ensure_directory_exists(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder
        .create(path)
        .map_err(|e| Error::io("create directory", path, e))
}

/// Create `path` if needed and prove it is writable with a scratch file.
///
/// A scratch file that cannot be removed afterwards is logged, not returned.
pub fn validate_directory_writable(path: &Path, logger: &dyn Logger) -> Result<()> {
    ensure_directory_exists(path)?;

    let scratch = path.join(format!("{}-{}", WRITE_CHECK_FILE_NAME, std::process::id()));
    let mut file = create_file(&scratch, 0o644)?;
    let written = file
        .write_all(b"rulem")
        .map_err(|e| Error::io("write scratch file", &scratch, e));
    drop(file);

    if let Err(e) = fs::remove_file(&scratch) {
        logger.warn(&format!(
            "failed to remove write check file {}: {}",
            scratch.display(),
            e
        ));
    }
    written
}
