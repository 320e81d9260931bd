//! Turns configured repositories into validated local directories.
//!
//! | Type | Local path | Status |
//! |------|-----------|--------|
//! | `local` | the configured path, created if missing | always `ok` |
//! | `github` | configured path, else `<storage>/github/<owner>/<repo>` | `ok`, `stale`, `dirty` or `error` after fetch |
//!
//! A remote that has never been cloned is cloned; a failed clone is an
//! error for that repository. An existing clone is fetched and compared,
//! but its working tree is never modified here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::atomic_io;
use crate::error::{Error, Result};
use crate::git::{self, GitAuth, GitClient};
use crate::logging::Logger;
use crate::models::{PreparedRepository, RepositoryEntry, RepositoryType, SyncState, SyncStatus};
use crate::path_guard;

/// Owner and repository name parsed from a git remote URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUrl {
    pub host: String,
    pub owner: String,
    pub repo: String,
    /// Whether HTTP credentials apply.
    pub https: bool,
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Parse `https://host/owner/repo[.git]`, `ssh://[user@]host[:port]/owner/repo`,
/// `git@host:owner/repo[.git]` and `file:///path/owner/repo`.
pub fn parse_remote_url(url: &str) -> Result<RemoteUrl> {
    let invalid = |reason: &str| Error::InvalidArgument(format!("invalid git URL '{}': {}", url, reason));
    let url = url.trim();

    let (scheme, host, path) = if let Some((scheme, rest)) = url.split_once("://") {
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let host = authority.rsplit('@').next().unwrap_or(authority);
        let host = host.split(':').next().unwrap_or(host);
        (scheme.to_lowercase(), host.to_string(), path)
    } else if let Some((authority, path)) = url.split_once(':') {
        // scp-like syntax: user@host:owner/repo
        if !authority.contains('@') {
            return Err(invalid("expected scheme://, or user@host:path"));
        }
        let host = authority.rsplit('@').next().unwrap_or(authority);
        ("ssh".to_string(), host.to_string(), path)
    } else {
        return Err(invalid("expected scheme://, or user@host:path"));
    };

    if !matches!(scheme.as_str(), "https" | "http" | "ssh" | "git" | "file") {
        return Err(invalid("unsupported scheme"));
    }
    if host.is_empty() && scheme != "file" {
        return Err(invalid("missing host"));
    }

    let segments: Vec<&str> = path.trim_end_matches('/').split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return Err(invalid("expected owner/repo"));
    }
    let owner = segments[segments.len() - 2];
    let repo = segments[segments.len() - 1];
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    if !valid_segment(owner) || !valid_segment(repo) {
        return Err(invalid("owner or repository contains unsupported characters"));
    }

    Ok(RemoteUrl {
        host,
        owner: owner.to_string(),
        repo: repo.to_string(),
        https: scheme == "https",
    })
}

/// Prepares repositories against one default storage directory.
#[derive(Clone)]
pub struct RepositoryResolver {
    storage_dir: PathBuf,
    git: GitClient,
    logger: Arc<dyn Logger>,
}

impl RepositoryResolver {
    pub fn new(storage_dir: &Path, logger: Arc<dyn Logger>) -> Self {
        Self {
            storage_dir: storage_dir.to_path_buf(),
            git: GitClient::new(),
            logger,
        }
    }

    pub fn with_git(mut self, git: GitClient) -> Self {
        self.git = git;
        self
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Where a remote repository is (or will be) cloned.
    pub fn clone_path(&self, entry: &RepositoryEntry) -> Result<PathBuf> {
        if !entry.path.trim().is_empty() {
            return path_guard::expand_home(&entry.path);
        }
        let url = entry
            .url
            .as_deref()
            .ok_or_else(|| Error::InvalidArgument(format!("repository '{}' has no URL", entry.name)))?;
        let remote = parse_remote_url(url)?;
        Ok(self
            .storage_dir
            .join("github")
            .join(&remote.owner)
            .join(&remote.repo))
    }

    pub async fn prepare(&self, entry: &RepositoryEntry) -> Result<PreparedRepository> {
        match entry.kind {
            RepositoryType::Local => self.prepare_local(entry),
            RepositoryType::Github => self.prepare_remote(entry).await,
        }
    }

    fn prepare_local(&self, entry: &RepositoryEntry) -> Result<PreparedRepository> {
        let path = path_guard::validate_storage_path(&entry.path)?;
        if !path.exists() {
            self.logger
                .info(&format!("creating repository directory {}", path.display()));
            atomic_io::ensure_directory_exists(&path)?;
        }
        Ok(PreparedRepository {
            entry: entry.clone(),
            local_path: path,
            status: SyncStatus::ok(),
        })
    }

    async fn prepare_remote(&self, entry: &RepositoryEntry) -> Result<PreparedRepository> {
        let url = entry
            .url
            .as_deref()
            .ok_or_else(|| Error::InvalidArgument(format!("repository '{}' has no URL", entry.name)))?;
        let remote = parse_remote_url(url)?;

        let path = self.clone_path(entry)?;
        let text = path.to_string_lossy().to_string();
        path_guard::validate_path_security(&text)?;
        if let Some(parent) = path.parent() {
            atomic_io::ensure_directory_exists(parent)?;
        }
        let path = path_guard::validate_storage_path(&text)?;

        let auth = self.auth_for(entry, &remote)?;

        if !path.exists() {
            self.logger
                .info(&format!("cloning {} into {}", url, path.display()));
            self.git
                .clone_repo(url, entry.branch.as_deref(), &path, auth.as_ref())
                .await?;
            return Ok(PreparedRepository {
                entry: entry.clone(),
                local_path: path,
                status: SyncStatus::ok(),
            });
        }

        let status = self.sync_status(&path, entry, auth.as_ref()).await?;
        if status.state != SyncState::Ok {
            self.logger.warn(&format!(
                "repository '{}' is {}: {}",
                entry.name, status.state, status.message
            ));
        }
        Ok(PreparedRepository {
            entry: entry.clone(),
            local_path: path,
            status,
        })
    }

    fn auth_for(&self, entry: &RepositoryEntry, remote: &RemoteUrl) -> Result<Option<GitAuth>> {
        let Some(var) = entry.credential_ref.as_deref() else {
            return Ok(None);
        };
        if !remote.https {
            self.logger.debug(&format!(
                "credential reference for '{}' ignored for non-https remote",
                entry.name
            ));
            return Ok(None);
        }
        let auth = GitAuth::from_env(var)?;
        if auth.is_none() {
            self.logger.warn(&format!(
                "credential variable {} for '{}' is not set",
                var, entry.name
            ));
        }
        Ok(auth)
    }

    /// Fetch and classify an existing clone. Only cancellation is an error;
    /// every git failure becomes an `error` status.
    async fn sync_status(
        &self,
        path: &Path,
        entry: &RepositoryEntry,
        auth: Option<&GitAuth>,
    ) -> Result<SyncStatus> {
        if !git::is_git_repo(path) {
            return Ok(SyncStatus::new(
                SyncState::Error,
                format!("{} is not a git repository", path.display()),
            ));
        }

        let demote = |e: Error| -> Result<SyncStatus> {
            if e.is_canceled() {
                Err(e)
            } else {
                Ok(SyncStatus::new(SyncState::Error, e.to_string()))
            }
        };

        if let Err(e) = self.git.fetch(path, auth).await {
            return demote(e);
        }
        match self.git.is_dirty(path).await {
            Ok(true) => {
                return Ok(SyncStatus::new(
                    SyncState::Dirty,
                    "local clone has uncommitted changes",
                ))
            }
            Ok(false) => {}
            Err(e) => return demote(e),
        }
        match self.git.commits_behind(path, entry.branch.as_deref()).await {
            Ok(0) => Ok(SyncStatus::ok()),
            Ok(n) => Ok(SyncStatus::new(
                SyncState::Stale,
                format!("remote is {} commit(s) ahead", n),
            )),
            Err(e) => demote(e),
        }
    }

    /// Prepare every entry concurrently. Results keep configured order.
    pub async fn prepare_all(
        &self,
        entries: &[RepositoryEntry],
    ) -> Vec<(RepositoryEntry, Result<PreparedRepository>)> {
        let mut set = JoinSet::new();
        for (index, entry) in entries.iter().cloned().enumerate() {
            let resolver = self.clone();
            set.spawn(async move {
                let result = resolver.prepare(&entry).await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<Result<PreparedRepository>>> =
            entries.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => self
                    .logger
                    .error(&format!("repository task failed: {}", e)),
            }
        }

        entries
            .iter()
            .cloned()
            .zip(slots)
            .map(|(entry, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(Error::external("prepare repository", "task did not complete"))
                });
                (entry, result)
            })
            .collect()
    }
}
