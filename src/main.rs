//! # rulem CLI
//!
//! The `rulem` binary manages rule repositories, distributes rule files
//! into the current project, and serves them to MCP clients.
//!
//! ## Usage
//!
//! ```bash
//! rulem [--config ~/.config/rulem/config.yaml] [-v] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rulem init` | Create an empty configuration |
//! | `rulem repo list` | List repositories with their sync status |
//! | `rulem repo add-local <name> <path>` | Register a local directory |
//! | `rulem repo add-github <name> <url>` | Clone and register a GitHub repository |
//! | `rulem repo remove <id-or-name>` | Forget a repository |
//! | `rulem list` | List Markdown files across repositories |
//! | `rulem tools` | List rule files as MCP tools |
//! | `rulem import <file> --repo <name>` | Copy a file into a repository |
//! | `rulem apply <repo> <file>` | Copy or link a rule file into the project |
//! | `rulem edit <repo> <file>` | Open a stored rule file in `$EDITOR` |
//! | `rulem mcp` | Serve rule files over MCP stdio |
//! | `rulem completions <shell>` | Print shell completions |
//!
//! ## Exit codes
//!
//! `0` success, `1` setup failure, `2` configuration could not be loaded
//! (including first run), `3` command failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use rulem::commands::{self, Session};
use rulem::config::Config;
use rulem::logging;
use rulem::targets::Assistant;

const EXIT_SETUP: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_RUNTIME: u8 = 3;

/// rulem: manage AI assistant rule files across repositories.
///
/// The configuration lives in the platform config directory unless
/// `--config` or `RULEM_CONFIG_PATH` says otherwise.
#[derive(Parser)]
#[command(
    name = "rulem",
    about = "Manage AI assistant rule files across repositories and distribute them into projects",
    version,
    long_about = "rulem keeps Markdown rule files in local directories or GitHub clones, \
    copies or links them into a project at the layout each assistant expects, and serves \
    them to MCP clients as one tool per file."
)]
struct Cli {
    /// Path to the configuration file (YAML).
    ///
    /// Must be inside your home directory or the system temp directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output to stderr. `RULEM_LOG` overrides this.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty configuration file.
    ///
    /// Does nothing when the configuration already exists.
    Init,

    /// Manage configured repositories.
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },

    /// List Markdown files across all repositories.
    List {
        /// Also scan the current directory.
        #[arg(long)]
        cwd: bool,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// List rule files as they would be registered as MCP tools.
    ///
    /// Files without frontmatter or without a description are skipped and
    /// counted; `-v` lists them with the reason.
    Tools {
        /// Also scan the current directory.
        #[arg(long)]
        cwd: bool,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Copy a file into a repository.
    Import {
        /// File to import.
        file: PathBuf,

        /// Repository id or name.
        #[arg(long)]
        repo: String,

        /// Store under this file name instead of the source's.
        #[arg(long)]
        name: Option<String>,

        /// Replace an existing file of the same name.
        #[arg(long)]
        overwrite: bool,
    },

    /// Copy or link a stored rule file into the current directory.
    Apply {
        /// Repository id or name.
        repo: String,

        /// Path of the rule file inside the repository.
        file: PathBuf,

        /// Destination layout.
        #[arg(long, value_enum, default_value_t = Assistant::Default)]
        assistant: Assistant,

        /// Explicit destination relative to the current directory.
        #[arg(long, conflicts_with = "assistant")]
        dest: Option<String>,

        /// Create a relative symlink instead of a copy.
        #[arg(long)]
        link: bool,

        /// Replace an existing destination.
        #[arg(long)]
        overwrite: bool,
    },

    /// Open a stored rule file in `$EDITOR` (or nano, then vi).
    Edit {
        /// Repository id or name.
        repo: String,

        /// Path of the rule file inside the repository.
        file: PathBuf,
    },

    /// Serve rule files as MCP tools over stdin/stdout.
    Mcp {
        /// Also register rule files from the current directory.
        #[arg(long)]
        cwd: bool,
    },

    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum RepoAction {
    /// List repositories with their sync status.
    List,

    /// Register a local directory. It is created if missing.
    AddLocal {
        name: String,
        path: PathBuf,
    },

    /// Clone and register a GitHub repository.
    AddGithub {
        name: String,
        url: String,

        /// Branch to clone and track.
        #[arg(long)]
        branch: Option<String>,

        /// Environment variable holding an access token for https remotes.
        #[arg(long)]
        credential_env: Option<String>,
    },

    /// Forget a repository. Clones stay on disk.
    Remove {
        /// Repository id or name.
        repo: String,
    },
}

fn report(err: &anyhow::Error) {
    eprintln!("error: {:#}", err);
    let hint = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<rulem::error::Error>())
        .and_then(|e| e.hint());
    if let Some(hint) = hint {
        eprintln!("hint: {}", hint);
    }
}

async fn run(command: Commands, verbose: bool, session: &Session, mut config: Config) -> anyhow::Result<()> {
    match command {
        Commands::Repo { action } => match action {
            RepoAction::List => {
                commands::run_repo_list(session, &config, commands::cancel_on_ctrl_c()).await?;
            }
            RepoAction::AddLocal { name, path } => {
                commands::run_repo_add_local(session, &mut config, &name, &path)?;
            }
            RepoAction::AddGithub {
                name,
                url,
                branch,
                credential_env,
            } => {
                commands::run_repo_add_github(session, &mut config, &name, &url, branch, credential_env)
                    .await?;
            }
            RepoAction::Remove { repo } => {
                commands::run_repo_remove(session, &mut config, &repo)?;
            }
        },
        Commands::List { cwd, json } => {
            let discovery =
                commands::run_discovery(session, &config, cwd, commands::cancel_on_ctrl_c()).await?;
            commands::print_files(&discovery, json)?;
        }
        Commands::Tools { cwd, json } => {
            let discovery =
                commands::run_discovery(session, &config, cwd, commands::cancel_on_ctrl_c()).await?;
            commands::print_tools(&discovery, json, verbose)?;
        }
        Commands::Import {
            file,
            repo,
            name,
            overwrite,
        } => {
            commands::run_import(session, &config, &file, &repo, name.as_deref(), overwrite).await?;
        }
        Commands::Apply {
            repo,
            file,
            assistant,
            dest,
            link,
            overwrite,
        } => {
            commands::run_apply(
                session,
                &config,
                &repo,
                &file,
                assistant,
                dest.as_deref(),
                link,
                overwrite,
            )
            .await?;
        }
        Commands::Edit { repo, file } => {
            commands::run_edit(session, &config, &repo, &file).await?;
        }
        Commands::Mcp { cwd } => {
            commands::run_mcp(session, &config, cwd, commands::cancel_on_ctrl_c()).await?;
        }
        Commands::Init | Commands::Completions { .. } => {
            // Handled before the configuration is loaded
            unreachable!()
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Commands that don't need logging or configuration
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "rulem", &mut std::io::stdout());
        return ExitCode::SUCCESS;
    }

    if let Err(e) = logging::init_tracing(cli.verbose) {
        report(&e);
        return ExitCode::from(EXIT_SETUP);
    }
    let session = match Session::new(cli.config.as_deref(), logging::tracing_logger()) {
        Ok(session) => session,
        Err(e) => {
            report(&anyhow::Error::from(e));
            return ExitCode::from(EXIT_SETUP);
        }
    };

    if let Commands::Init = cli.command {
        return match commands::run_init(&session) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                report(&e);
                ExitCode::from(EXIT_SETUP)
            }
        };
    }

    let config = match session.store.load() {
        Ok(config) => config,
        Err(e) => {
            report(&anyhow::Error::from(e));
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match run(cli.command, cli.verbose, &session, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}
