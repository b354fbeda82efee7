//! quest - closed-loop, metric-driven unit-test synthesizer.
//!
//! Single entry point: `quest run --repo . --version <tag> --file <path>`.

use clap::{Parser, Subcommand};
use quest::config::QuestConfig;
use quest::orchestrator::{Orchestrator, OrchestratorConfig};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "quest", version, about = "Closed-loop unit-test synthesizer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the draft/critique/refine loop against a single target file.
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to the repository root being tested.
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Version/commit tag recorded in the run's request artifacts.
    #[arg(long)]
    version: String,

    /// Target Python source file, relative to `--repo`.
    #[arg(long)]
    file: PathBuf,

    /// Directory under which `runs/<run_id>/` is created.
    #[arg(long, default_value = "runs")]
    runs_dir: PathBuf,

    /// Explicit config file path; defaults to `QuestConfig::default_path()`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Character budget for embedded source text in the context pack.
    #[arg(long, default_value_t = 12_000)]
    context_max_chars: usize,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    install_panic_hook();
    init_logging()?;
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> color_eyre::Result<()> {
    let quest_config = match &args.config {
        Some(path) => QuestConfig::load(path)?,
        None => QuestConfig::load_or_default(),
    };

    let config = OrchestratorConfig {
        quest: quest_config,
        repo: args.repo,
        version: args.version,
        target_file: args.file,
        runs_dir: args.runs_dir,
        context_max_chars: args.context_max_chars,
    };

    tracing::info!(target_file = %config.target_file.display(), "starting quest run");

    let orchestrator = Orchestrator::new(config, CancellationToken::new());
    let summary = orchestrator.run().await?;

    println!(
        "run {} finished: {} (iterations={}, coverage={:.1}, mutation={:.1})",
        summary.run_id, summary.finish_reason, summary.iterations, summary.final_coverage, summary.final_mutation
    );

    if !summary.targets_met {
        std::process::exit(1);
    }
    Ok(())
}

/// Install a panic hook that reports via color_eyre before the default hook
/// runs, so a panic mid-run still prints a readable backtrace.
fn install_panic_hook() {
    let _ = color_eyre::install();
}

/// Initialize logging to a file. Logs are written to `quest.log` in the
/// current directory; verbosity is controlled by `RUST_LOG`.
fn init_logging() -> color_eyre::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let log_file = std::fs::File::create("quest.log")?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(log_file)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quest=info")))
        .init();

    Ok(())
}
