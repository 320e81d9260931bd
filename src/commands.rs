//! Command implementations behind the `rulem` binary.
//!
//! Tables and results go to stdout; discovery progress, repository warnings
//! and skipped-file summaries go to stderr so stdout stays parseable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::{self, Config, ConfigStore};
use crate::discovery::{spawn_discovery, Discovery, DiscoveryEvent, DiscoveryOptions};
use crate::editor;
use crate::file_manager::FileManager;
use crate::logging::Logger;
use crate::mcp;
use crate::models::{PreparedRepository, RepositoryEntry, SyncState};
use crate::path_guard;
use crate::repository::{parse_remote_url, RepositoryResolver};
use crate::targets::Assistant;

/// Configuration location, clone storage and logger for one invocation.
pub struct Session {
    pub store: ConfigStore,
    pub storage_dir: PathBuf,
    pub logger: Arc<dyn Logger>,
}

impl Session {
    /// `config_path` overrides `RULEM_CONFIG_PATH` and the platform default.
    pub fn new(config_path: Option<&Path>, logger: Arc<dyn Logger>) -> crate::error::Result<Self> {
        let store = match config_path {
            Some(path) => ConfigStore::new(path, logger.clone())?,
            None => ConfigStore::from_env(logger.clone())?,
        };
        Ok(Self {
            store,
            storage_dir: config::default_storage_dir()?,
            logger,
        })
    }

    pub fn resolver(&self) -> RepositoryResolver {
        RepositoryResolver::new(&self.storage_dir, self.logger.clone())
    }

    async fn prepare(&self, entry: &RepositoryEntry) -> Result<PreparedRepository> {
        let prepared = self
            .resolver()
            .prepare(entry)
            .await
            .with_context(|| format!("failed to prepare repository '{}'", entry.name))?;
        if prepared.status.state != SyncState::Ok {
            eprintln!(
                "warning: repository '{}' is {}: {}",
                entry.name, prepared.status.state, prepared.status.message
            );
        }
        Ok(prepared)
    }

    fn file_manager(&self, prepared: &PreparedRepository) -> Result<FileManager> {
        let fm = FileManager::new(&prepared.local_path.to_string_lossy(), self.logger.clone())
            .with_context(|| format!("failed to open {}", prepared.local_path.display()))?;
        Ok(fm.with_repository(&prepared.entry))
    }
}

/// Cancelled when the user presses Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

pub fn run_init(session: &Session) -> Result<()> {
    if session.store.exists() {
        println!(
            "Configuration already exists at {}",
            session.store.path().display()
        );
        return Ok(());
    }
    let mut config = Config::default();
    session.store.save(&mut config)?;
    println!("Created {}", session.store.path().display());
    println!("Add a repository with `rulem repo add-local <name> <path>`.");
    Ok(())
}

pub async fn run_repo_list(
    session: &Session,
    config: &Config,
    token: CancellationToken,
) -> Result<()> {
    if config.repositories.is_empty() {
        println!("No repositories configured.");
        return Ok(());
    }
    let resolver = session.resolver();
    let results = tokio::select! {
        biased;
        _ = token.cancelled() => bail!("canceled"),
        results = resolver.prepare_all(&config.repositories) => results,
    };

    println!("{:<32} {:<20} {:<7} {:<7} PATH", "ID", "NAME", "TYPE", "STATUS");
    for (entry, result) in results {
        let (status, path) = match &result {
            Ok(prepared) => (
                prepared.status.state.to_string(),
                prepared.local_path.display().to_string(),
            ),
            Err(e) => ("error".to_string(), e.to_string()),
        };
        println!(
            "{:<32} {:<20} {:<7} {:<7} {}",
            entry.id,
            entry.name,
            entry.kind.to_string(),
            status,
            path
        );
    }
    Ok(())
}

pub fn run_repo_add_local(
    session: &Session,
    config: &mut Config,
    name: &str,
    path: &Path,
) -> Result<()> {
    let absolute = path_guard::to_absolute(&path_guard::expand_home(&path.to_string_lossy())?)?;
    let validated = path_guard::validate_storage_path(&absolute.to_string_lossy())
        .with_context(|| format!("cannot use {} as a repository", absolute.display()))?;

    let entry = RepositoryEntry::local(
        name,
        &validated.to_string_lossy(),
        chrono::Utc::now().timestamp(),
    )?;
    config.add_repository(entry.clone())?;
    crate::atomic_io::ensure_directory_exists(&validated)?;
    crate::atomic_io::validate_directory_writable(&validated, session.logger.as_ref())
        .with_context(|| format!("{} is not writable", validated.display()))?;
    session.store.save(config)?;
    println!("Added local repository '{}' ({})", entry.name, entry.id);
    Ok(())
}

pub async fn run_repo_add_github(
    session: &Session,
    config: &mut Config,
    name: &str,
    url: &str,
    branch: Option<String>,
    credential_env: Option<String>,
) -> Result<()> {
    parse_remote_url(url).with_context(|| format!("unsupported repository URL: {}", url))?;
    if let Some(var) = &credential_env {
        path_guard::sanitize_identifier(var, 100)
            .with_context(|| format!("invalid credential variable name: {}", var))?;
    }

    let entry = RepositoryEntry::github(
        name,
        url,
        branch,
        credential_env,
        chrono::Utc::now().timestamp(),
    )?;
    // Reject duplicates before cloning.
    if config.find_repository(&entry.name).is_ok() {
        bail!("a repository named '{}' already exists", entry.name);
    }

    let prepared = session.prepare(&entry).await?;
    config.add_repository(entry.clone())?;
    session.store.save(config)?;
    println!(
        "Added GitHub repository '{}' ({}) at {}",
        entry.name,
        entry.id,
        prepared.local_path.display()
    );
    Ok(())
}

pub fn run_repo_remove(session: &Session, config: &mut Config, key: &str) -> Result<()> {
    let removed = config.remove_repository(key)?;
    session.store.save(config)?;
    println!("Removed repository '{}' ({})", removed.name, removed.id);
    if removed.is_remote() {
        println!("The local clone was left in place.");
    }
    Ok(())
}

/// Run a discovery pass, reporting progress on stderr.
pub async fn run_discovery(
    session: &Session,
    config: &Config,
    include_cwd: bool,
    token: CancellationToken,
) -> Result<Discovery> {
    let options = DiscoveryOptions {
        cwd: if include_cwd {
            Some(std::env::current_dir().context("failed to read the working directory")?)
        } else {
            None
        },
        ..Default::default()
    };
    let (handle, mut events) = spawn_discovery(
        config.clone(),
        session.resolver(),
        options,
        session.logger.clone(),
        token,
    );

    let mut outcome = None;
    while let Some(event) = events.recv().await {
        match event {
            DiscoveryEvent::Started { repositories } => {
                session
                    .logger
                    .debug(&format!("discovering rule files in {} repositories", repositories));
            }
            DiscoveryEvent::RepositoryPrepared { name, status } => match status {
                Some(status) if status.state != SyncState::Ok => {
                    eprintln!("warning: repository '{}' is {}: {}", name, status.state, status.message);
                }
                Some(_) => {}
                None => eprintln!("warning: repository '{}' is unavailable", name),
            },
            DiscoveryEvent::Finished(discovery) => outcome = Some(Ok(*discovery)),
            DiscoveryEvent::Failed(message) => outcome = Some(Err(anyhow::anyhow!(message))),
            DiscoveryEvent::Canceled => outcome = Some(Err(anyhow::anyhow!("discovery canceled"))),
        }
    }
    handle.await.context("discovery task panicked")?;

    let discovery = match outcome {
        Some(result) => result?,
        None => bail!("discovery ended without a result"),
    };
    for scan in &discovery.repositories {
        if let Some(error) = &scan.error {
            eprintln!("warning: skipped repository '{}': {}", scan.entry.name, error);
        }
    }
    Ok(discovery)
}

pub fn print_files(discovery: &Discovery, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&discovery.items)?);
        return Ok(());
    }
    if discovery.items.is_empty() {
        println!("No Markdown files found.");
        return Ok(());
    }
    println!("{:<24} PATH", "REPOSITORY");
    for item in &discovery.items {
        println!("{:<24} {}", item.repository_name, item.path.display());
    }
    Ok(())
}

pub fn print_tools(discovery: &Discovery, json: bool, verbose: bool) -> Result<()> {
    if json {
        let tools: Vec<serde_json::Value> = discovery
            .registry
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.tool_name,
                    "description": tool.tool_description,
                    "path": tool.rule_file.file_path,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&tools)?);
    } else if discovery.registry.is_empty() {
        println!("No rule files found.");
    } else {
        println!("{:<32} DESCRIPTION", "TOOL");
        for tool in discovery.registry.iter() {
            println!("{:<32} {}", tool.tool_name, tool.tool_description);
        }
    }

    let skipped = discovery.report.skipped_count();
    if skipped > 0 {
        eprintln!("{} file(s) skipped", skipped);
        if verbose {
            for file in &discovery.report.skipped {
                eprintln!("  {}: {}", file.path.display(), file.reason);
            }
        }
    }
    Ok(())
}

pub async fn run_import(
    session: &Session,
    config: &Config,
    file: &Path,
    repository: &str,
    new_name: Option<&str>,
    overwrite: bool,
) -> Result<()> {
    let entry = config.find_repository(repository)?;
    let source = path_guard::to_absolute(&path_guard::expand_home(&file.to_string_lossy())?)?;
    let prepared = session.prepare(entry).await?;
    let fm = session.file_manager(&prepared)?;
    let stored = fm
        .copy_file_to_storage(&source, new_name, overwrite)
        .with_context(|| format!("failed to import {}", source.display()))?;
    fm.close();
    println!("Imported {} into '{}' as {}", source.display(), entry.name, stored.display());
    Ok(())
}

/// Copy or link a stored rule file into the working directory.
#[allow(clippy::too_many_arguments)]
pub async fn run_apply(
    session: &Session,
    config: &Config,
    repository: &str,
    file: &Path,
    assistant: Assistant,
    dest: Option<&str>,
    link: bool,
    overwrite: bool,
) -> Result<()> {
    let entry = config.find_repository(repository)?;
    let destination = match dest {
        Some(dest) => dest.to_string(),
        None => assistant.destination(file)?,
    };

    let prepared = session.prepare(entry).await?;
    let cwd = std::env::current_dir().context("failed to read the working directory")?;
    let fm = session.file_manager(&prepared)?.with_cwd(&cwd)?;
    let written = if link {
        fm.create_symlink_from_storage(file, &destination, overwrite)
    } else {
        fm.copy_file_from_storage(file, &destination, overwrite)
    }
    .with_context(|| format!("failed to apply {} for {}", file.display(), assistant))?;
    fm.close();

    let verb = if link { "Linked" } else { "Copied" };
    println!("{} {} to {}", verb, file.display(), written.display());
    Ok(())
}

pub async fn run_edit(
    session: &Session,
    config: &Config,
    repository: &str,
    file: &Path,
) -> Result<()> {
    let entry = config.find_repository(repository)?;
    let prepared = session.prepare(entry).await?;
    let fm = session.file_manager(&prepared)?;
    let path = fm.storage_absolute_path(file)?;
    path_guard::validate_file_in_directory(&path, fm.storage_dir())?;
    fm.close();

    tokio::task::spawn_blocking(move || editor::open_in_editor(&path))
        .await
        .context("editor task panicked")??;
    Ok(())
}

pub async fn run_mcp(
    session: &Session,
    config: &Config,
    include_cwd: bool,
    token: CancellationToken,
) -> Result<()> {
    let discovery = run_discovery(session, config, include_cwd, token).await?;
    if discovery.report.skipped_count() > 0 {
        session.logger.info(&format!(
            "{} file(s) were not registered as tools",
            discovery.report.skipped_count()
        ));
    }
    mcp::run_stdio(discovery.registry).await
}
