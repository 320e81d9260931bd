//! YAML frontmatter extraction.
//!
//! A rule file opens with a block delimited by lines holding only `---`:
//!
//! ```text
//! ---
//! description: Prefer explicit error types
//! name: errors
//! applyTo: "**/*.rs"
//! ---
//! # Body
//! ```
//!
//! The splitter is a small line-driven state machine. A UTF-8 BOM and blank
//! lines before the opening delimiter are tolerated. Only plain block YAML
//! is accepted; anchors, aliases and merge keys are rejected before the
//! block reaches `serde_yaml`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DELIMITER: &str = "---";
const BOM: char = '\u{feff}';

/// Recognized frontmatter keys. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontmatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        rename = "applyTo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub apply_to: Option<String>,
}

impl Frontmatter {
    /// Render as a delimited block, including the closing `---` line.
    pub fn to_block(&self) -> Result<String> {
        let yaml = serde_yaml::to_string(self).map_err(|e| Error::parse("frontmatter", e))?;
        let yaml = if yaml.trim() == "{}" { String::new() } else { yaml };
        Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n"))
    }
}

/// The two halves of a file with frontmatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split<'a> {
    pub yaml: &'a str,
    pub body: &'a str,
}

enum State {
    Preamble,
    Block { start: usize },
}

fn is_delimiter(line: &str) -> bool {
    line.trim_end() == DELIMITER
}

/// Locate the frontmatter block.
///
/// Returns `Ok(None)` when the first non-blank line is not `---`, and a
/// parse error when the block is never closed.
pub fn split_frontmatter(content: &str) -> Result<Option<Split<'_>>> {
    let text = content.strip_prefix(BOM).unwrap_or(content);
    let mut state = State::Preamble;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let next = offset + line.len();
        match state {
            State::Preamble => {
                if line.trim().is_empty() {
                    offset = next;
                    continue;
                }
                if !is_delimiter(line) {
                    return Ok(None);
                }
                state = State::Block { start: next };
            }
            State::Block { start } => {
                if is_delimiter(line) {
                    return Ok(Some(Split {
                        yaml: &text[start..offset],
                        body: &text[next..],
                    }));
                }
            }
        }
        offset = next;
    }

    match state {
        State::Preamble => Ok(None),
        State::Block { .. } => Err(Error::parse("frontmatter", "missing closing '---' line")),
    }
}

/// Reject YAML features outside plain block mappings.
fn reject_references(yaml: &str) -> Result<()> {
    for (index, line) in yaml.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("<<:") {
            return Err(Error::parse(
                "frontmatter",
                format!("line {}: merge keys are not allowed", index + 1),
            ));
        }
        let value = match trimmed.strip_prefix("- ") {
            Some(item) => item,
            None => trimmed.split_once(':').map(|(_, v)| v).unwrap_or(""),
        };
        let value = value.trim_start();
        if value.starts_with('&') || value.starts_with('*') {
            return Err(Error::parse(
                "frontmatter",
                format!("line {}: anchors and aliases are not allowed", index + 1),
            ));
        }
    }
    Ok(())
}

/// Split and decode. `Ok(None)` means the file has no frontmatter.
pub fn parse_frontmatter(content: &str) -> Result<Option<(Frontmatter, &str)>> {
    let Some(split) = split_frontmatter(content)? else {
        return Ok(None);
    };
    reject_references(split.yaml)?;
    if split.yaml.trim().is_empty() {
        return Ok(Some((Frontmatter::default(), split.body)));
    }
    let front: Frontmatter =
        serde_yaml::from_str(split.yaml).map_err(|e| Error::parse("frontmatter", e))?;
    Ok(Some((front, split.body)))
}
