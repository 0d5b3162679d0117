//! # Bug Report Generator CLI (`bugreport`)
//!
//! Watches the bug-report spreadsheet and renders a document for every new
//! row. With no subcommand it runs the watcher until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! bugreport --config ./config/bugreport.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bugreport watch` | Watch the data file and process it when it settles (default) |
//! | `bugreport run` | Run a single pass and exit |
//! | `bugreport status` | Show paths, checkpoint, and document count |
//!
//! ## Examples
//!
//! ```bash
//! # Watch with built-in defaults (data/responses.xlsx)
//! bugreport
//!
//! # Re-check every row, writing only documents that are missing
//! bugreport run --full
//!
//! # Machine-readable progress
//! bugreport run --progress json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use bugreport::config::{self, Config};
use bugreport::pipeline::{self, PassOptions};
use bugreport::progress::ProgressMode;
use bugreport::render::Template;
use bugreport::status;
use bugreport::watcher::ChangeWatcher;

/// Bug Report Generator: one document per new spreadsheet row.
#[derive(Parser)]
#[command(
    name = "bugreport",
    about = "Generate bug report documents from spreadsheet rows",
    version,
    long_about = "Watches a spreadsheet (or CSV) of bug reports and renders one .docx document \
    per new row from a template. The highest processed ID is checkpointed so reruns only \
    pick up new rows."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/bugreport.toml` when it exists, otherwise
    /// built-in defaults are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only log warnings and errors.
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Per-row progress output. Defaults to human on a TTY for `run`, and
    /// always human for `watch`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Watch the data file and run a pass each time it settles.
    ///
    /// Rapid successive writes are coalesced: a pass starts only once the
    /// file has been quiet for `watch.debounce_ms`. Stop with Ctrl+C.
    Watch,

    /// Run a single processing pass and exit.
    Run {
        /// Ignore the checkpoint and consider every row. Documents that
        /// already exist are still skipped.
        #[arg(long)]
        full: bool,

        /// Count new rows without writing documents or the checkpoint.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show resolved paths, the last processed ID, and the document count.
    Status,
}

fn init_tracing(quiet: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if quiet {
            EnvFilter::new("bugreport=warn")
        } else {
            EnvFilter::new("bugreport=info")
        }
    });
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Fail fast on missing inputs instead of on the first trigger.
fn check_inputs(cfg: &Config) -> anyhow::Result<()> {
    if !cfg.paths.data_file.is_file() {
        anyhow::bail!("Data file not found: {}", cfg.paths.data_file.display());
    }
    let template = Template::open(&cfg.paths.template_file).with_context(|| {
        format!(
            "Failed to load template: {}",
            cfg.paths.template_file.display()
        )
    })?;
    tracing::info!(
        template = %template.path().display(),
        extension = template.extension(),
        "template ok"
    );
    Ok(())
}

async fn run_watch(cfg: Config, progress: ProgressMode) -> anyhow::Result<()> {
    check_inputs(&cfg)?;

    let data_file: &Path = &cfg.paths.data_file;
    let delay = Duration::from_millis(cfg.watch.debounce_ms);
    let run_on_start = cfg.watch.run_on_start;
    let reporter = progress.reporter();
    let pass_cfg = cfg.clone();

    let watcher = ChangeWatcher::start(data_file, delay, move || {
        println!("Data file stable. Generating documents...");
        let summary = pipeline::run_pass(&pass_cfg, PassOptions::default(), reporter.as_ref())?;
        pipeline::print_summary(&summary);
        Ok(())
    })?;

    println!(
        "Watching {} for changes... (Ctrl+C to stop)",
        watcher.tracked().display()
    );
    if run_on_start {
        watcher.trigger();
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    println!("Stopping watcher...");

    let passes = tokio::task::spawn_blocking(move || watcher.stop()).await??;
    tracing::info!(passes, "watcher stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let cfg = config::resolve_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => {
            run_watch(cfg, cli.progress.unwrap_or(ProgressMode::Human)).await?;
        }
        Commands::Run { full, dry_run } => {
            let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);
            let reporter = progress.reporter();
            let summary = pipeline::run_pass(&cfg, PassOptions { full, dry_run }, reporter.as_ref())?;
            pipeline::print_summary(&summary);
        }
        Commands::Status => {
            status::run_status(&cfg)?;
        }
    }

    Ok(())
}
