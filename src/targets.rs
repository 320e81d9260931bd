//! Where each assistant expects its instructions.
//!
//! | Assistant | Destination (relative to the project) |
//! |-----------|---------------------------------------|
//! | GitHub Copilot | `.github/copilot-instructions.md` |
//! | Cursor | `.cursor/rules/<file name>` |
//! | Claude | `claude.md` |
//! | Gemini CLI | `Gemini.md` |
//! | OpenCode | `Agent.md` |
//! | Windsurf | `.windsurfrules` |
//! | default | the file's own name |

use std::fmt;
use std::path::Path;

use clap::ValueEnum;

use crate::error::Result;
use crate::path_guard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Assistant {
    Copilot,
    Cursor,
    Claude,
    GeminiCli,
    #[value(name = "opencode")]
    OpenCode,
    Windsurf,
    /// Keep the stored file name.
    Default,
}

impl fmt::Display for Assistant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Assistant::Copilot => "GitHub Copilot",
            Assistant::Cursor => "Cursor",
            Assistant::Claude => "Claude",
            Assistant::GeminiCli => "Gemini CLI",
            Assistant::OpenCode => "OpenCode",
            Assistant::Windsurf => "Windsurf",
            Assistant::Default => "default",
        };
        f.write_str(s)
    }
}

impl Assistant {
    /// CWD-relative destination for `source`, validated.
    pub fn destination(&self, source: &Path) -> Result<String> {
        let file_name = || -> Result<String> {
            let base = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            path_guard::sanitize_filename(&base)
        };

        let dest = match self {
            Assistant::Copilot => ".github/copilot-instructions.md".to_string(),
            Assistant::Cursor => format!(".cursor/rules/{}", file_name()?),
            Assistant::Claude => "claude.md".to_string(),
            Assistant::GeminiCli => "Gemini.md".to_string(),
            Assistant::OpenCode => "Agent.md".to_string(),
            Assistant::Windsurf => ".windsurfrules".to_string(),
            Assistant::Default => file_name()?,
        };
        path_guard::validate_cwd_relative(&dest)?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destinations() {
        let src = Path::new("/store/team/style.md");
        assert_eq!(
            Assistant::Copilot.destination(src).unwrap(),
            ".github/copilot-instructions.md"
        );
        assert_eq!(
            Assistant::Cursor.destination(src).unwrap(),
            ".cursor/rules/style.md"
        );
        assert_eq!(Assistant::Claude.destination(src).unwrap(), "claude.md");
        assert_eq!(Assistant::GeminiCli.destination(src).unwrap(), "Gemini.md");
        assert_eq!(Assistant::OpenCode.destination(src).unwrap(), "Agent.md");
        assert_eq!(Assistant::Windsurf.destination(src).unwrap(), ".windsurfrules");
        assert_eq!(Assistant::Default.destination(src).unwrap(), "style.md");
        assert!(Assistant::Default.destination(Path::new("/")).is_err());
    }

    #[test]
    fn cli_names() {
        assert_eq!(
            Assistant::from_str("gemini-cli", true).unwrap(),
            Assistant::GeminiCli
        );
        assert_eq!(Assistant::from_str("opencode", true).unwrap(), Assistant::OpenCode);
    }
}
