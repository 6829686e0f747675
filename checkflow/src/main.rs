//! checkflow CLI - inspect persisted pipeline runs.

use anyhow::{Context, Result};
use checkflow::config::CheckflowConfig;
use checkflow::observability::init_tracing;
use checkflow::report::RunReport;
use checkflow::store::{ArtifactStore, FsArtifactStore};
use checkflow::utils::format_timestamp;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "checkflow")]
#[command(version)]
#[command(about = "Inspect checkpointed pipeline runs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Artifact directory (defaults to CHECKFLOW_ARTIFACT_DIR or ./artifacts)
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List persisted runs with their status
    Runs,

    /// Show the status of a run (only stages with recorded results)
    Status {
        /// Run id
        run_id: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show every recorded attempt of a stage
    History {
        /// Run id
        run_id: String,

        /// Stage name
        stage: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = CheckflowConfig::from_env().context("Invalid environment configuration")?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_tracing(&config.logging)?;

    let dir = cli.dir.unwrap_or(config.artifact_dir);
    debug!(dir = %dir.display(), "Opening artifact store");
    let store = FsArtifactStore::new(dir.clone());

    match cli.command {
        Commands::Runs => {
            let runs = store.list_runs().await.context("Failed to list runs")?;
            if runs.is_empty() {
                println!("No runs in {}", dir.display());
            }
            for run in runs {
                println!(
                    "{}  {:<12} {:<24} {}",
                    run.run_id,
                    run.status.to_string(),
                    run.pipeline,
                    format_timestamp(&run.updated_at)
                );
            }
        }

        Commands::Status { run_id, json } => {
            let report = RunReport::load(&store, &run_id, None)
                .await
                .with_context(|| format!("Failed to load run {run_id}"))?
                .with_context(|| format!("Run {run_id} not found in {}", dir.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{report}");
            }
        }

        Commands::History { run_id, stage } => {
            let history = store
                .history(&run_id, &stage)
                .await
                .with_context(|| format!("Failed to read history of {run_id}/{stage}"))?;
            if history.is_empty() {
                println!("No results recorded for {run_id}/{stage}");
            }
            for result in history {
                print!(
                    "{}  attempt {}  {}",
                    format_timestamp(&result.completed_at),
                    result.attempt,
                    result.status
                );
                match result.error {
                    Some(error) => println!("  {error}"),
                    None => println!(),
                }
            }
        }
    }

    Ok(())
}
