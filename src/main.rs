//! # project-context CLI (`pctx`)
//!
//! Every command prints a pretty JSON document to stdout and exits non-zero
//! when the operation did not succeed. Logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! pctx --config ./pctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pctx init <project>` | Create the project directory, manifest and index |
//! | `pctx extract <kind> <locator>` | Extract one source to an artifact, without indexing |
//! | `pctx ingest <project> <kind> <locator>...` | Extract and index sources |
//! | `pctx index <project> <artifact>` | Index an existing artifact |
//! | `pctx query <project> "<question>"` | Search a project's index |
//! | `pctx projects [name]` | List projects or show one project's sources |
//!
//! `<kind>` is one of `local`, `youtube`, `web`, `github`, `gdoc`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use project_context::config;
use project_context::error::CoreError;
use project_context::models::SourceType;
use project_context::workspace::Workspace;

/// Project-scoped semantic retrieval.
#[derive(Parser)]
#[command(
    name = "pctx",
    about = "Ingest sources into per-project vector indexes and query them",
    version,
    long_about = "project-context ingests local files, web pages, GitHub repositories, \
                  YouTube transcripts and Google Docs into per-project vector indexes, \
                  and answers questions with ranked, source-attributed evidence."
)]
struct Cli {
    /// Path to the TOML configuration file. Defaults are used when it does not exist.
    #[arg(long, global = true, default_value = "./pctx.toml")]
    config: PathBuf,

    /// Workspace root holding one directory per project. Overrides `[workspace].root`.
    #[arg(long, global = true, env = "PCTX_ROOT")]
    root: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project (idempotent).
    Init {
        /// Project name.
        project: String,
    },

    /// Extract a single source into an artifact without indexing it.
    Extract {
        /// Source kind: local, youtube, web, github or gdoc.
        kind: SourceType,
        /// File path, URL, video id, `owner/repo` or document id.
        locator: String,
        /// Directory the artifact is written to.
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Extract sources and index them into a project.
    ///
    /// Creates the project if needed. Locators are processed concurrently and
    /// a failure of one does not affect the others.
    Ingest {
        project: String,
        /// Source kind: local, youtube, web, github or gdoc.
        kind: SourceType,
        #[arg(required = true)]
        locators: Vec<String>,
    },

    /// Index an artifact previously written by `extract`.
    Index {
        project: String,
        artifact: PathBuf,
    },

    /// Answer a question from a project's index.
    Query {
        project: String,
        question: String,
        /// Number of chunks to return (defaults to `[retrieval].default_top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// List projects, or show one project's sources grouped by kind.
    Projects { name: Option<String> },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_error(err: &CoreError) -> Result<ExitCode> {
    print_json(&json!({
        "success": false,
        "error": err.to_string(),
        "error_kind": err.kind(),
    }))?;
    Ok(ExitCode::FAILURE)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut cfg = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => return print_error(&CoreError::InvalidConfig(format!("{:#}", e))),
    };
    if let Some(root) = cli.root {
        cfg.workspace.root = root;
    }
    let workspace = Arc::new(Workspace::new(cfg));

    let code = match cli.command {
        Commands::Init { project } => match workspace.init(&project).await {
            Ok(init) => {
                print_json(&init)?;
                ExitCode::SUCCESS
            }
            Err(e) => print_error(&e)?,
        },
        Commands::Extract {
            kind,
            locator,
            output_dir,
        } => {
            let result = workspace.extract(kind, &locator, &output_dir).await;
            print_json(&result)?;
            exit_code(result.success)
        }
        Commands::Ingest {
            project,
            kind,
            locators,
        } => {
            let results = workspace.ingest(&project, kind, &locators).await;
            let success = results.iter().all(|r| r.success);
            print_json(&json!({
                "success": success,
                "project": project,
                "succeeded": results.iter().filter(|r| r.success).count(),
                "failed": results.iter().filter(|r| !r.success).count(),
                "results": results,
            }))?;
            exit_code(success)
        }
        Commands::Index { project, artifact } => {
            match workspace.index_artifact(&project, &artifact).await {
                Ok(outcome) => {
                    print_json(&json!({
                        "success": true,
                        "project": project,
                        "source_id": outcome.source_id,
                        "chunks_written": outcome.chunks_written,
                        "total_chunks": outcome.total_chunks,
                    }))?;
                    ExitCode::SUCCESS
                }
                Err(e) => print_error(&e)?,
            }
        }
        Commands::Query {
            project,
            question,
            top_k,
        } => {
            let result = workspace.query(&project, &question, top_k).await;
            print_json(&result)?;
            exit_code(result.success)
        }
        Commands::Projects { name } => match workspace.projects(name.as_deref()) {
            Ok(view) => {
                print_json(&view)?;
                ExitCode::SUCCESS
            }
            Err(e) => print_error(&e)?,
        },
    };

    workspace.shutdown().await;
    Ok(code)
}
