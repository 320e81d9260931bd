//! # rulem
//!
//! Manage AI assistant rule files across repositories and distribute them
//! into projects.
//!
//! A rule file is a Markdown file with YAML frontmatter carrying at least a
//! `description`. rulem keeps them in local directories or GitHub clones,
//! copies or links them into a project at the layout each assistant expects,
//! and serves them to MCP clients as one tool per file.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────┐   ┌────────────┐
//! │  Config  │──▶│ Repository │──▶│ File Manager │──▶│ Rule File  │
//! │  (YAML)  │   │  Resolver  │   │  + Scanner   │   │ Processor  │
//! └──────────┘   └────────────┘   └──────────────┘   └─────┬──────┘
//!                                                          │
//!                                   ┌──────────────────────┤
//!                                   ▼                      ▼
//!                              ┌──────────┐          ┌──────────┐
//!                              │   CLI    │          │   MCP    │
//!                              │ (rulem)  │          │ (stdio)  │
//!                              └──────────┘          └──────────┘
//! ```
//!
//! Every path that reaches the filesystem passes through [`path_guard`];
//! every write goes through [`atomic_io`] or [`symlink`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`error`] | Error taxonomy |
//! | [`logging`] | Injected logger and `tracing` setup |
//! | [`path_guard`] | Path validation and sanitization |
//! | [`atomic_io`] | Atomic copy and directory helpers |
//! | [`symlink`] | Relative links and link validation |
//! | [`sandbox`] | Root-confined filesystem handle |
//! | [`scanner`] | Sandboxed recursive directory scan |
//! | [`git`] | `git` subprocess client |
//! | [`repository`] | Local and GitHub repository preparation |
//! | [`frontmatter`] | YAML frontmatter parsing |
//! | [`rulefile`] | Rule files and the tool registry |
//! | [`file_manager`] | Storage and working-directory operations |
//! | [`config`] | Configuration file |
//! | [`models`] | Shared data types |
//! | [`discovery`] | Background discovery pass |
//! | [`targets`] | Assistant destination layouts |
//! | [`editor`] | `$EDITOR` integration |
//! | [`mcp`] | MCP stdio server |
//! | [`commands`] | CLI command implementations |

pub mod atomic_io;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod editor;
pub mod error;
pub mod file_manager;
pub mod frontmatter;
pub mod git;
pub mod logging;
pub mod mcp;
pub mod models;
pub mod path_guard;
pub mod repository;
pub mod rulefile;
pub mod sandbox;
pub mod scanner;
pub mod symlink;
pub mod targets;
