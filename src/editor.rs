//! Opening a rule file in the user's editor.
//!
//! `$EDITOR` wins when set (it may carry arguments, e.g. `code --wait`);
//! otherwise `nano`, then `vi`, whichever is found first on `PATH`.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

const FALLBACK_EDITORS: &[&str] = &["nano", "vi"];

/// Program and leading arguments for the editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Pick an editor from an `$EDITOR` value, falling back to `nano`/`vi`.
pub fn resolve_editor(editor_var: Option<&str>) -> Result<EditorCommand> {
    if let Some(value) = editor_var.map(str::trim).filter(|v| !v.is_empty()) {
        let mut parts = value.split_whitespace().map(str::to_string);
        if let Some(program) = parts.next() {
            return Ok(EditorCommand {
                program: PathBuf::from(program),
                args: parts.collect(),
            });
        }
    }

    FALLBACK_EDITORS
        .iter()
        .find_map(|name| which::which(name).ok())
        .map(|program| EditorCommand {
            program,
            args: Vec::new(),
        })
        .ok_or_else(|| {
            Error::external("editor", "EDITOR is not set and neither nano nor vi was found")
        })
}

/// Run the editor on `path` with inherited stdio and wait for it to exit.
pub fn open_in_editor(path: &Path) -> Result<()> {
    let editor = resolve_editor(std::env::var("EDITOR").ok().as_deref())?;
    let status = Command::new(&editor.program)
        .args(&editor.args)
        .arg(path)
        .status()
        .map_err(|e| {
            Error::external(
                "editor",
                format!("failed to start {}: {}", editor.program.display(), e),
            )
        })?;
    if !status.success() {
        return Err(Error::external(
            "editor",
            format!("{} exited with {}", editor.program.display(), status),
        ));
    }
    Ok(())
}
