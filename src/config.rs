//! Configuration file handling.
//!
//! The configuration is a small YAML document listing the user's rule
//! repositories:
//!
//! ```yaml
//! version: "1.0"
//! init_time: 1718000000
//! repositories:
//!   - id: team-rules-1718000000
//!     name: team-rules
//!     type: local
//!     created_at: 1718000000
//!     path: ~/rules
//! ```
//!
//! It lives at `<config dir>/rulem/config.yaml` (`~/.config` on Linux,
//! `~/Library/Application Support` on macOS, `%APPDATA%` on Windows) unless
//! `RULEM_CONFIG_PATH` points elsewhere. Wherever it lives, the path must be
//! free of traversal, outside reserved directories, and inside the home
//! directory or the system temp directory.
//!
//! The file is written with mode 0600 in a directory created with 0755. It
//! is the only shared mutable state; concurrent saves are last-write-wins.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::atomic_io;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::models::RepositoryEntry;
use crate::path_guard;

pub const CONFIG_ENV_VAR: &str = "RULEM_CONFIG_PATH";
pub const STORAGE_ENV_VAR: &str = "RULEM_STORAGE_DIR";
pub const APP_NAME: &str = "rulem";
pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const CONFIG_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Unix seconds of the first save. Zero until then.
    #[serde(default)]
    pub init_time: i64,
    #[serde(default)]
    pub repositories: Vec<RepositoryEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            init_time: 0,
            repositories: Vec::new(),
        }
    }
}

impl Config {
    fn position(&self, key: &str) -> Option<usize> {
        self.repositories
            .iter()
            .position(|r| r.id == key)
            .or_else(|| {
                let lowered = key.to_lowercase();
                self.repositories
                    .iter()
                    .position(|r| r.name.to_lowercase() == lowered)
            })
    }

    /// Look up by exact id, then by case-insensitive name.
    pub fn find_repository(&self, key: &str) -> Result<&RepositoryEntry> {
        self.position(key)
            .map(|i| &self.repositories[i])
            .ok_or_else(|| Error::NotFound {
                what: "repository",
                name: key.to_string(),
            })
    }

    /// Append an entry. Ids and names (case-insensitively) must be unique.
    pub fn add_repository(&mut self, entry: RepositoryEntry) -> Result<()> {
        let lowered = entry.name.to_lowercase();
        if self
            .repositories
            .iter()
            .any(|r| r.id == entry.id || r.name.to_lowercase() == lowered)
        {
            return Err(Error::InvalidArgument(format!(
                "a repository named '{}' already exists",
                entry.name
            )));
        }
        self.repositories.push(entry);
        Ok(())
    }

    pub fn remove_repository(&mut self, key: &str) -> Result<RepositoryEntry> {
        let index = self.position(key).ok_or_else(|| Error::NotFound {
            what: "repository",
            name: key.to_string(),
        })?;
        Ok(self.repositories.remove(index))
    }
}

/// `RULEM_CONFIG_PATH` if set, else the platform location.
pub fn default_config_path() -> Result<PathBuf> {
    if let Some(value) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
        return path_guard::expand_home(&value.to_string_lossy());
    }
    let base = dirs::config_dir().ok_or(Error::HomeUnavailable)?;
    Ok(base.join(APP_NAME).join(CONFIG_FILE_NAME))
}

/// `RULEM_STORAGE_DIR` if set, else `<data dir>/rulem`. Clones of remote
/// repositories live beneath it.
pub fn default_storage_dir() -> Result<PathBuf> {
    if let Some(value) = std::env::var_os(STORAGE_ENV_VAR).filter(|v| !v.is_empty()) {
        return path_guard::expand_home(&value.to_string_lossy());
    }
    let base = dirs::data_dir().ok_or(Error::HomeUnavailable)?;
    Ok(base.join(APP_NAME))
}

/// Check a configuration path and return its absolute form.
pub fn validate_config_path(path: &Path) -> Result<PathBuf> {
    let text = path.to_string_lossy();
    path_guard::validate_path_security(&text)?;
    let absolute = path_guard::to_absolute(&path_guard::expand_home(&text)?)?;
    if path_guard::is_reserved_directory(&absolute) {
        return Err(Error::Reserved { path: absolute });
    }
    if path_guard::is_under_temp_dir(&absolute) {
        return Ok(absolute);
    }
    path_guard::validate_path_in_home(&absolute.to_string_lossy())?;
    Ok(absolute)
}

/// Read and parse the configuration at `path`.
///
/// A missing file is [`Error::FirstRunRequired`].
pub fn load_config(path: &Path, logger: &dyn Logger) -> Result<Config> {
    let path = validate_config_path(path)?;
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::FirstRunRequired { path });
        }
        Err(e) => return Err(Error::io("read config", &path, e)),
    };

    let config: Config = serde_yaml::from_str(&content)
        .map_err(|e| Error::parse(format!("config {}", path.display()), e))?;
    if config.repositories.is_empty() {
        logger.warn(&format!(
            "configuration {} lists no repositories",
            path.display()
        ));
    }
    Ok(config)
}

/// Write `config` to `path` (0600, parent 0755), stamping `init_time` on
/// the first save.
pub fn save_config(path: &Path, config: &mut Config) -> Result<()> {
    let path = validate_config_path(path)?;
    if let Some(parent) = path.parent() {
        atomic_io::ensure_directory_exists(parent)?;
    }
    if config.init_time == 0 {
        config.init_time = chrono::Utc::now().timestamp();
    }

    let yaml = serde_yaml::to_string(config).map_err(|e| Error::parse("config", e))?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(&path)
        .map_err(|e| Error::io("open config for writing", &path, e))?;
    file.write_all(yaml.as_bytes())
        .map_err(|e| Error::io("write config", &path, e))?;
    file.sync_all()
        .map_err(|e| Error::io("sync config", &path, e))?;

    // An existing file keeps its old mode through truncate.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::io("set config permissions", &path, e))?;
    }
    Ok(())
}

/// Posted to subscribers after [`ConfigStore::reload`].
#[derive(Debug, Clone)]
pub enum ConfigMessage {
    Reloaded(Config),
    ReloadFailed { message: String, first_run: bool },
}

/// A configuration file location plus its reload subscribers.
pub struct ConfigStore {
    path: PathBuf,
    logger: Arc<dyn Logger>,
    sender: Option<mpsc::UnboundedSender<ConfigMessage>>,
}

impl ConfigStore {
    pub fn new(path: &Path, logger: Arc<dyn Logger>) -> Result<Self> {
        let path = validate_config_path(path)?;
        Ok(Self {
            path,
            logger,
            sender: None,
        })
    }

    /// Store at [`default_config_path`].
    pub fn from_env(logger: Arc<dyn Logger>) -> Result<Self> {
        Self::new(&default_config_path()?, logger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Receive a [`ConfigMessage`] for every later reload.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ConfigMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sender = Some(tx);
        rx
    }

    pub fn load(&self) -> Result<Config> {
        load_config(&self.path, self.logger.as_ref())
    }

    pub fn save(&self, config: &mut Config) -> Result<()> {
        save_config(&self.path, config)?;
        self.logger.debug(&format!(
            "saved configuration to {}",
            self.path.display()
        ));
        Ok(())
    }

    /// Re-read from disk and notify the subscriber, if any.
    pub fn reload(&self) -> Result<Config> {
        let result = self.load();
        if let Some(sender) = &self.sender {
            let message = match &result {
                Ok(config) => ConfigMessage::Reloaded(config.clone()),
                Err(e) => ConfigMessage::ReloadFailed {
                    message: e.to_string(),
                    first_run: e.is_first_run(),
                },
            };
            if sender.send(message).is_err() {
                self.logger.debug("config reload subscriber has gone away");
            }
        }
        result
    }
}
