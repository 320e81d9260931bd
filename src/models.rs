//! Core data models shared across the kernel.
//!
//! Repository entries are persisted in the configuration file; everything
//! else here lives for the span of a single user operation.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::path_guard::sanitize_identifier;

/// Repository id used for files found in the current working directory.
pub const CWD_REPOSITORY_ID: &str = "cwd";

const ID_NAME_MAX_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    Local,
    Github,
}

impl fmt::Display for RepositoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryType::Local => f.write_str("local"),
            RepositoryType::Github => f.write_str("github"),
        }
    }
}

/// A configured rule repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RepositoryType,
    pub created_at: i64,
    /// Local directory, or clone location for remote repositories.
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Name of an environment variable holding an access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
}

impl RepositoryEntry {
    /// Deterministic id: `sanitized(name)-created_at`.
    pub fn make_id(name: &str, created_at: i64) -> Result<String> {
        Ok(format!(
            "{}-{}",
            sanitize_identifier(name, ID_NAME_MAX_LEN)?,
            created_at
        ))
    }

    pub fn local(name: &str, path: &str, created_at: i64) -> Result<Self> {
        Ok(Self {
            id: Self::make_id(name, created_at)?,
            name: name.to_string(),
            kind: RepositoryType::Local,
            created_at,
            path: path.to_string(),
            url: None,
            branch: None,
            credential_ref: None,
        })
    }

    pub fn github(
        name: &str,
        url: &str,
        branch: Option<String>,
        credential_ref: Option<String>,
        created_at: i64,
    ) -> Result<Self> {
        Ok(Self {
            id: Self::make_id(name, created_at)?,
            name: name.to_string(),
            kind: RepositoryType::Github,
            created_at,
            path: String::new(),
            url: Some(url.to_string()),
            branch,
            credential_ref,
        })
    }

    pub fn is_remote(&self) -> bool {
        self.kind == RepositoryType::Github
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Ok,
    Stale,
    Dirty,
    Error,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Ok => "ok",
            SyncState::Stale => "stale",
            SyncState::Dirty => "dirty",
            SyncState::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    pub message: String,
}

impl SyncStatus {
    pub fn ok() -> Self {
        Self {
            state: SyncState::Ok,
            message: String::new(),
        }
    }

    pub fn new(state: SyncState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }
}

/// A repository with a validated local directory.
#[derive(Debug, Clone)]
pub struct PreparedRepository {
    pub entry: RepositoryEntry,
    pub local_path: PathBuf,
    pub status: SyncStatus,
}

/// A Markdown file found by scanning a repository or the working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileItem {
    pub name: String,
    /// Absolute path.
    pub path: PathBuf,
    pub repository_id: String,
    pub repository_name: String,
    pub repository_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_deterministic() {
        assert_eq!(
            RepositoryEntry::make_id("My Rules", 1700000000).unwrap(),
            "My_Rules-1700000000"
        );
        assert!(RepositoryEntry::make_id("!!!", 1).is_err());
    }

    #[test]
    fn entry_serializes_type_key_and_skips_empty_remote_fields() {
        let entry = RepositoryEntry::local("work", "~/rules", 42).unwrap();
        let yaml = serde_yaml::to_string(&entry).unwrap();
        assert!(yaml.contains("type: local"));
        assert!(!yaml.contains("url"));
        assert!(!yaml.contains("credential_ref"));

        let back: RepositoryEntry = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, entry);
    }
}
