//! One discovery pass: configuration → prepared repositories → scans →
//! tool registry.
//!
//! Repositories are prepared concurrently, then scanned and processed in
//! configured order on a blocking thread, so tool-name suffixes are stable
//! for a given filesystem state. A repository that cannot be prepared or
//! scanned is reported and left out; it never fails the pass.
//!
//! [`spawn_discovery`] runs a pass in the background and posts
//! [`DiscoveryEvent`]s. Cancellation is reported as
//! [`DiscoveryEvent::Canceled`], not as a failure.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::file_manager::{scan_markdown, FileManager, ItemSource};
use crate::logging::Logger;
use crate::models::{FileItem, PreparedRepository, RepositoryEntry, SyncStatus, CWD_REPOSITORY_ID};
use crate::repository::RepositoryResolver;
use crate::rulefile::{ProcessReport, RuleFileProcessor, ToolRegistry, DEFAULT_MAX_FILE_SIZE};

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Also scan this directory as the `cwd` pseudo-repository.
    pub cwd: Option<PathBuf>,
    pub max_file_size: u64,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            cwd: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Outcome for one configured repository.
#[derive(Debug, Clone)]
pub struct RepositoryScan {
    pub entry: RepositoryEntry,
    pub local_path: Option<PathBuf>,
    pub status: Option<SyncStatus>,
    pub files: usize,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub registry: ToolRegistry,
    pub report: ProcessReport,
    pub repositories: Vec<RepositoryScan>,
    pub items: Vec<FileItem>,
}

#[derive(Debug)]
pub enum DiscoveryEvent {
    Started { repositories: usize },
    RepositoryPrepared { name: String, status: Option<SyncStatus> },
    Finished(Box<Discovery>),
    Failed(String),
    Canceled,
}

/// Run a full pass.
pub async fn discover(
    config: &Config,
    resolver: &RepositoryResolver,
    options: DiscoveryOptions,
    logger: Arc<dyn Logger>,
    token: CancellationToken,
) -> Result<Discovery> {
    discover_with_events(config, resolver, options, logger, token, None).await
}

async fn discover_with_events(
    config: &Config,
    resolver: &RepositoryResolver,
    options: DiscoveryOptions,
    logger: Arc<dyn Logger>,
    token: CancellationToken,
    events: Option<&mpsc::UnboundedSender<DiscoveryEvent>>,
) -> Result<Discovery> {
    let post = |event: DiscoveryEvent| {
        if let Some(tx) = events {
            let _ = tx.send(event);
        }
    };
    post(DiscoveryEvent::Started {
        repositories: config.repositories.len(),
    });

    let prepared = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(Error::Canceled),
        prepared = resolver.prepare_all(&config.repositories) => prepared,
    };

    let mut ready: Vec<PreparedRepository> = Vec::new();
    let mut failed: Vec<RepositoryScan> = Vec::new();
    for (entry, result) in prepared {
        match result {
            Ok(repo) => {
                post(DiscoveryEvent::RepositoryPrepared {
                    name: entry.name.clone(),
                    status: Some(repo.status.clone()),
                });
                ready.push(repo);
            }
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) => {
                logger.warn(&format!("repository '{}' unavailable: {}", entry.name, e));
                post(DiscoveryEvent::RepositoryPrepared {
                    name: entry.name.clone(),
                    status: None,
                });
                failed.push(RepositoryScan {
                    entry,
                    local_path: None,
                    status: None,
                    files: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let blocking_token = token.clone();
    let mut discovery = tokio::task::spawn_blocking(move || {
        scan_and_process(ready, options, logger, &blocking_token)
    })
    .await
    .map_err(|e| Error::external("discovery", e.to_string()))??;

    // Keep configured order across prepared and failed entries.
    discovery.repositories.extend(failed);
    let order: Vec<&str> = config.repositories.iter().map(|r| r.id.as_str()).collect();
    discovery
        .repositories
        .sort_by_key(|scan| order.iter().position(|id| *id == scan.entry.id));
    Ok(discovery)
}

fn scan_and_process(
    prepared: Vec<PreparedRepository>,
    options: DiscoveryOptions,
    logger: Arc<dyn Logger>,
    token: &CancellationToken,
) -> Result<Discovery> {
    let mut processor =
        RuleFileProcessor::new(logger.clone()).with_max_file_size(options.max_file_size);
    let mut items: Vec<FileItem> = Vec::new();
    let mut repositories = Vec::new();

    for repo in prepared {
        let scanned = FileManager::new(&repo.local_path.to_string_lossy(), logger.clone())
            .map(|fm| fm.with_repository(&repo.entry).with_cancellation(token.clone()))
            .and_then(|fm| {
                let found = fm.scan_storage();
                processor.add_storage_root(&repo.entry.id, fm.storage_dir());
                fm.close();
                found
            });

        match scanned {
            Ok(found) => {
                repositories.push(RepositoryScan {
                    entry: repo.entry,
                    local_path: Some(repo.local_path),
                    status: Some(repo.status),
                    files: found.len(),
                    error: None,
                });
                items.extend(found);
            }
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) => {
                logger.warn(&format!("scan of '{}' failed: {}", repo.entry.name, e));
                repositories.push(RepositoryScan {
                    entry: repo.entry,
                    local_path: Some(repo.local_path),
                    status: Some(repo.status),
                    files: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    if let Some(cwd) = &options.cwd {
        let source = ItemSource {
            id: CWD_REPOSITORY_ID,
            name: "Current directory",
            kind: CWD_REPOSITORY_ID,
        };
        match scan_markdown(cwd, source, logger.clone(), Some(token)) {
            Ok(found) => {
                let root = crate::path_guard::resolve_existing_prefix(cwd);
                processor.add_storage_root(CWD_REPOSITORY_ID, &root);
                items.extend(found);
            }
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) => logger.warn(&format!("scan of {} failed: {}", cwd.display(), e)),
        }
    }

    let (registry, report) = processor.process_cancellable(&items, token)?;
    Ok(Discovery {
        registry,
        report,
        repositories,
        items,
    })
}

/// Run [`discover`] on a background task, posting events to the returned
/// receiver. The final event is always `Finished`, `Failed` or `Canceled`.
pub fn spawn_discovery(
    config: Config,
    resolver: RepositoryResolver,
    options: DiscoveryOptions,
    logger: Arc<dyn Logger>,
    token: CancellationToken,
) -> (JoinHandle<()>, mpsc::UnboundedReceiver<DiscoveryEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let result =
            discover_with_events(&config, &resolver, options, logger, token, Some(&tx)).await;
        let last = match result {
            Ok(discovery) => DiscoveryEvent::Finished(Box::new(discovery)),
            Err(e) if e.is_canceled() => DiscoveryEvent::Canceled,
            Err(e) => DiscoveryEvent::Failed(e.to_string()),
        };
        let _ = tx.send(last);
    });
    (handle, rx)
}
