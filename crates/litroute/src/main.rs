//! `litroute` - sorts a Zotero inbox into holding collections.
//!
//! Scans a source collection, classifies tagged items with a chat model,
//! moves each item to exactly one destination and checkpoints every outcome
//! so an interrupted workflow can be resumed.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod app;
mod output;

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use litroute_core::credentials::{self, Secret};
use litroute_core::{Config, RunParams, RunStatus, ScanLimits, Source, WorkflowId};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use output::Format;

#[derive(Parser)]
#[command(name = "litroute")]
#[command(author, version, about = "Route Zotero inbox items into holding collections")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (defaults to <config_dir>/litroute/config.toml)
    #[arg(short, long, global = true, env = "LITROUTE_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start (or continue) a routing workflow
    Run {
        /// Workflow id; reusing an id continues that workflow
        #[arg(short, long)]
        workflow: String,

        #[command(flatten)]
        scan: ScanArgs,

        /// Record what would happen without changing the library
        #[arg(long)]
        dry_run: bool,

        /// Do not sweep the whole library after the source collection
        #[arg(long)]
        no_library_fallback: bool,
    },

    /// Resume a suspended or aborted workflow
    Resume {
        /// Workflow id
        workflow: String,
    },

    /// Resume several workflows concurrently
    Batch {
        /// Workflow ids
        #[arg(required = true)]
        workflows: Vec<String>,
    },

    /// List stored workflows
    List,

    /// Show a workflow's checkpoint and outcome log
    Show {
        /// Workflow id
        workflow: String,
    },

    /// Delete a workflow's checkpoint
    Finalize {
        /// Workflow id
        workflow: String,
    },

    /// Move duplicate items to the duplicates collection
    Dedupe {
        #[command(flatten)]
        scan: ScanArgs,

        /// Scan the whole library instead of a collection
        #[arg(long, conflicts_with = "source")]
        library: bool,

        /// Report duplicate groups without moving anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage stored API keys
    Credentials {
        #[command(subcommand)]
        action: CredentialAction,
    },
}

#[derive(Args)]
struct ScanArgs {
    /// Source collection key or name (defaults to the configured source)
    #[arg(short, long)]
    source: Option<String>,

    /// Items to process before stopping
    #[arg(short = 'n', long)]
    treated_limit: Option<usize>,

    /// Items fetched per page
    #[arg(long = "scan-limit", alias = "page-size")]
    page_size: Option<u32>,
}

impl ScanArgs {
    fn limits(&self, config: &Config) -> Result<ScanLimits> {
        let limits = ScanLimits {
            page_size: self.page_size.unwrap_or(config.workflow.page_size),
            treated_limit: self.treated_limit.unwrap_or(config.workflow.treated_limit),
        };
        if limits.page_size == 0 || limits.treated_limit == 0 {
            bail!("--scan-limit and --treated-limit must be at least 1");
        }
        Ok(limits)
    }
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Store a key read from stdin
    Set {
        /// `zotero` or `llm`
        secret: String,
    },
    /// Remove a stored key
    Clear {
        /// `zotero` or `llm`
        secret: String,
    },
    /// Show which keys are available
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "litroute=info,litroute_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let format = Format::from_flag(cli.json);

    if let Commands::Credentials { action } = &cli.command {
        credential_command(action)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            workflow,
            scan,
            dry_run,
            no_library_fallback,
        } => {
            let id = WorkflowId::new(workflow)?;
            let limits = scan.limits(&config)?;
            let app = app::connect(&config).await?;
            let source = match &scan.source {
                Some(name) => app.library.resolve_collection(name).await?,
                None => app.source.clone(),
            };
            let mut sources = vec![Source::Collection(source)];
            if config.workflow.library_fallback && !no_library_fallback {
                sources.push(Source::Library);
            }
            let params = RunParams {
                sources,
                page_size: limits.page_size,
                treated_limit: limits.treated_limit,
                dry_run,
            };

            let cancel = cancel_on_ctrl_c();
            info!(workflow = %id, dry_run, "Starting workflow");
            let report = app.engine.start(id, params, &cancel).await?;
            output::run_report(format, &report)?;
            Ok(exit_for(report.status))
        }
        Commands::Resume { workflow } => {
            let id = WorkflowId::new(workflow)?;
            let app = app::connect(&config).await?;
            let report = app.engine.resume(&id, &cancel_on_ctrl_c()).await?;
            output::run_report(format, &report)?;
            Ok(exit_for(report.status))
        }
        Commands::Batch { workflows } => {
            let ids = workflows
                .into_iter()
                .map(WorkflowId::new)
                .collect::<Result<Vec<_>, _>>()?;
            let app = app::connect(&config).await?;
            let mut results: Vec<_> = app
                .engine
                .resume_all(ids, cancel_on_ctrl_c())
                .await
                .into_iter()
                .map(|(id, result)| (id, result.map_err(|e| e.to_string())))
                .collect();
            results.sort_by(|a, b| a.0.cmp(&b.0));
            output::batch(format, &results)?;
            let all_done = results
                .iter()
                .all(|(_, r)| r.as_ref().is_ok_and(|r| r.status == RunStatus::Completed));
            Ok(if all_done {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::List => {
            let summaries = app::registry(&config).await?.list().await?;
            output::summaries(format, &summaries)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { workflow } => {
            let id = WorkflowId::new(workflow)?;
            let checkpoint = app::registry(&config).await?.show(&id).await?;
            output::checkpoint(format, &checkpoint)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Finalize { workflow } => {
            let id = WorkflowId::new(workflow)?;
            if !app::registry(&config).await?.finalize(&id).await? {
                bail!("Workflow not found: {id}");
            }
            if format == Format::Text {
                println!("Finalized {id}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Dedupe {
            scan,
            library,
            dry_run,
        } => {
            let limits = scan.limits(&config)?;
            let app = app::connect(&config).await?;
            let source = if library {
                Source::Library
            } else {
                match &scan.source {
                    Some(name) => Source::Collection(app.library.resolve_collection(name).await?),
                    None => Source::Collection(app.source.clone()),
                }
            };
            let report = app
                .engine
                .dedupe(source, limits, dry_run, &cancel_on_ctrl_c())
                .await?;
            output::dedupe(format, &report)?;
            Ok(if report.failed.is_empty() && !report.cancelled {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Credentials { .. } => Ok(ExitCode::SUCCESS),
    }
}

/// Completed runs succeed; suspended runs exit with 2 so scripts can resume.
fn exit_for(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::Suspended => ExitCode::from(2),
        RunStatus::Running | RunStatus::Aborted => ExitCode::FAILURE,
    }
}

/// A token cancelled by the first Ctrl-C. The current item finishes and is
/// checkpointed before the run stops.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current item");
            token.cancel();
        }
    });
    cancel
}

fn credential_command(action: &CredentialAction) -> Result<()> {
    match action {
        CredentialAction::Set { secret } => {
            let secret = Secret::parse(secret)?;
            eprintln!("Enter the {secret} API key:");
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            let value = line.trim();
            if value.is_empty() {
                bail!("No key given");
            }
            credentials::store(secret, value)?;
            println!("Stored {secret} API key");
        }
        CredentialAction::Clear { secret } => {
            let secret = Secret::parse(secret)?;
            if credentials::delete(secret)? {
                println!("Removed {secret} API key");
            } else {
                println!("No stored {secret} API key");
            }
        }
        CredentialAction::Status => {
            for secret in [Secret::Zotero, Secret::Llm] {
                let from_env = secret
                    .env_vars()
                    .iter()
                    .find(|var| std::env::var(var).is_ok_and(|v| !v.trim().is_empty()));
                let state = match from_env {
                    Some(var) => format!("from ${var}"),
                    None if credentials::get_stored(secret)?.is_some() => "stored in keyring".into(),
                    None => "missing".into(),
                };
                println!("{secret:<7} {state}");
            }
        }
    }
    Ok(())
}
