//! `git` subprocess wrapper.
//!
//! Every invocation runs under a deadline and a cancellation token. The
//! child is killed when either fires. Output is captured; nothing is ever
//! prompted for (`GIT_TERMINAL_PROMPT=0`).
//!
//! Credentials are passed per command as an HTTP authorization header via
//! `-c http.extraHeader=...`. They are never written to the clone's
//! `.git/config`, never logged, and redacted from `Debug` output.

use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use base64::Engine;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP credentials for one remote.
#[derive(Clone)]
pub struct GitAuth {
    header: String,
}

impl GitAuth {
    /// Basic auth with the conventional `x-access-token` user name.
    pub fn from_token(token: &str) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("x-access-token:{}", token));
        Self {
            header: format!("AUTHORIZATION: basic {}", encoded),
        }
    }

    /// Read a token from the environment variable `var`.
    ///
    /// `Ok(None)` when the variable is unset or empty.
    pub fn from_env(var: &str) -> Result<Option<Self>> {
        if var.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "credential reference is empty".to_string(),
            ));
        }
        Ok(std::env::var(var)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(|t| Self::from_token(t.trim())))
    }

    fn config_arg(&self) -> String {
        format!("http.extraHeader={}", self.header)
    }
}

impl fmt::Debug for GitAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GitAuth(<redacted>)")
    }
}

/// Returns `true` if the directory contains a `.git` entry.
pub fn is_git_repo(dir: &Path) -> bool {
    dir.join(".git").exists()
}

#[derive(Debug, Clone)]
pub struct GitClient {
    timeout: Duration,
    cancel: CancellationToken,
}

impl Default for GitClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GitClient {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_GIT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    async fn run(
        &self,
        label: &str,
        args: &[&str],
        cwd: Option<&Path>,
        auth: Option<&GitAuth>,
    ) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(Error::Canceled);
        }

        let mut cmd = Command::new("git");
        if let Some(auth) = auth {
            cmd.arg("-c").arg(auth.config_arg());
        }
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::external(label, format!("failed to run git: {}", e)))?;

        let output = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Canceled),
            waited = tokio::time::timeout(self.timeout, child.wait_with_output()) => match waited {
                Err(_) => {
                    return Err(Error::external(
                        label,
                        format!("timed out after {}s", self.timeout.as_secs()),
                    ))
                }
                Ok(Err(e)) => return Err(Error::external(label, e.to_string())),
                Ok(Ok(output)) => output,
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::external(label, stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Single-branch clone of `url` into `dest`.
    pub async fn clone_repo(
        &self,
        url: &str,
        branch: Option<&str>,
        dest: &Path,
        auth: Option<&GitAuth>,
    ) -> Result<()> {
        let dest_str = dest.to_string_lossy();
        let mut args = vec!["clone"];
        if let Some(branch) = branch {
            args.extend(["--branch", branch, "--single-branch"]);
        }
        args.extend(["--", url, dest_str.as_ref()]);
        self.run("git clone", &args, None, auth).await.map(|_| ())
    }

    pub async fn fetch(&self, dir: &Path, auth: Option<&GitAuth>) -> Result<()> {
        self.run("git fetch", &["fetch", "--quiet", "origin"], Some(dir), auth)
            .await
            .map(|_| ())
    }

    /// Whether the working tree has uncommitted changes.
    pub async fn is_dirty(&self, dir: &Path) -> Result<bool> {
        let out = self
            .run("git status", &["status", "--porcelain"], Some(dir), None)
            .await?;
        Ok(!out.trim().is_empty())
    }

    /// Commits on the remote branch (or upstream) missing from `HEAD`.
    pub async fn commits_behind(&self, dir: &Path, branch: Option<&str>) -> Result<u64> {
        let range = match branch {
            Some(branch) => format!("HEAD..origin/{}", branch),
            None => "HEAD..@{u}".to_string(),
        };
        let out = self
            .run("git rev-list", &["rev-list", "--count", &range], Some(dir), None)
            .await?;
        out.trim()
            .parse::<u64>()
            .map_err(|e| Error::external("git rev-list", format!("unexpected output: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(["-c", "user.name=test", "-c", "user.email=test@example.com"])
            .args(args)
            .current_dir(dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    fn origin_repo(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        git(dir, &["init", "--quiet", "--initial-branch=main"]);
        fs::write(dir.join("rule.md"), "---\ndescription: d\n---\n").unwrap();
        git(dir, &["add", "."]);
        git(dir, &["commit", "--quiet", "-m", "init"]);
    }

    #[test]
    fn auth_header_is_base64_and_redacted() {
        let auth = GitAuth::from_token("secret");
        let expected = base64::engine::general_purpose::STANDARD.encode("x-access-token:secret");
        assert_eq!(
            auth.config_arg(),
            format!("http.extraHeader=AUTHORIZATION: basic {}", expected)
        );
        assert!(!format!("{:?}", auth).contains("secret"));
        assert!(GitAuth::from_env(" ").is_err());
        assert!(GitAuth::from_env("RULEM_TEST_UNSET_TOKEN_VAR").unwrap().is_none());
    }

    #[tokio::test]
    async fn clone_status_and_staleness() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let origin = tmp.path().join("origin");
        let clone = tmp.path().join("clone");
        origin_repo(&origin);

        let client = GitClient::new();
        client
            .clone_repo(&origin.to_string_lossy(), Some("main"), &clone, None)
            .await
            .unwrap();
        assert!(is_git_repo(&clone));
        assert!(!client.is_dirty(&clone).await.unwrap());
        assert_eq!(client.commits_behind(&clone, Some("main")).await.unwrap(), 0);

        fs::write(origin.join("second.md"), "x").unwrap();
        git(&origin, &["add", "."]);
        git(&origin, &["commit", "--quiet", "-m", "second"]);
        client.fetch(&clone, None).await.unwrap();
        assert_eq!(client.commits_behind(&clone, Some("main")).await.unwrap(), 1);

        fs::write(clone.join("local.md"), "x").unwrap();
        assert!(client.is_dirty(&clone).await.unwrap());
    }

    #[tokio::test]
    async fn failures_are_external_and_cancellation_wins() {
        if !git_available() {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let err = GitClient::new()
            .clone_repo(
                &tmp.path().join("missing").to_string_lossy(),
                None,
                &tmp.path().join("dest"),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::External);

        let token = CancellationToken::new();
        token.cancel();
        let err = GitClient::new()
            .with_cancellation(token)
            .is_dirty(tmp.path())
            .await
            .unwrap_err();
        assert!(err.is_canceled());
    }
}
