//! histsync CLI: run the export/import batch and manage watermarks.
//!
//! Commands:
//! - `run`: process every configured symbol (or a subset with `--only`)
//! - `watermarks`: report the last imported date per symbol
//! - `reset`: forget watermarks so symbols are fully reprocessed

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use histsync_core::{
    run_batch, BatchSummary, Credentials, PipelineConfig, StdoutProgress, SymbolEntry,
    SymbolProcessor, SystemRunner, WatermarkStore,
};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "histsync",
    about = "histsync: incremental history export from the terminal into the data manager"
)]
struct Cli {
    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Also write logs to this file.
    #[arg(long, global = true, default_value = "logs/process.log")]
    log_file: PathBuf,

    /// Disable the log file.
    #[arg(long, global = true, default_value_t = false)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export and import every configured symbol.
    Run {
        /// Path to the TOML pipeline config.
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,

        /// .env file with `Login` and `Password`. Defaults to ./.env if present.
        #[arg(long)]
        env_file: Option<PathBuf>,

        /// Only process these display ids (config order is kept).
        #[arg(long, num_args = 1..)]
        only: Vec<String>,
    },
    /// Show the last imported date for each symbol.
    Watermarks {
        /// Path to the TOML pipeline config.
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Remove watermark entries so the symbols start over from the default window.
    Reset {
        /// Display ids to reset.
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Path to the TOML pipeline config.
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,

        /// Actually remove (without this flag, only previews what would change).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = (!cli.no_log_file).then_some(cli.log_file.as_path());
    init_logging(&cli.log_level, log_file);

    match cli.command {
        Commands::Run {
            config,
            env_file,
            only,
        } => run_cmd(&config, env_file.as_deref(), &only),
        Commands::Watermarks { config } => run_watermarks(&config),
        Commands::Reset {
            symbols,
            config,
            confirm,
        } => run_reset(&config, &symbols, confirm),
    }
}

/// Console logging always; file logging when a path is given and openable.
fn init_logging(level: &str, log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("histsync={level},histsync_core={level}").into());

    let mut file_error = None;
    let file_layer = log_file.and_then(|path| match open_log_file(path) {
        Ok(file) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        ),
        Err(e) => {
            file_error = Some((path.to_path_buf(), e));
            None
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    if let Some((path, e)) = file_error {
        tracing::warn!(path = %path.display(), error = %e, "log file unavailable, logging to console only");
    }
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn load_env(env_file: Option<&Path>) -> Result<()> {
    match env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("load env file {}", path.display()))?;
        }
        None => {
            // A missing ./.env is fine; the variables may already be exported.
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

fn run_cmd(config_path: &Path, env_file: Option<&Path>, only: &[String]) -> Result<()> {
    load_env(env_file)?;

    let config = PipelineConfig::from_file(config_path)?;
    let credentials = Credentials::from_env()?;
    let symbols = select_symbols(&config, only)?;

    let runner = SystemRunner::new(config.process_timeout());
    let mut store = WatermarkStore::open(&config.watermark_path);
    tracing::info!(
        config = %config_path.display(),
        symbols = symbols.len(),
        watermarks = store.len(),
        "starting batch"
    );

    let today = chrono::Local::now().date_naive();
    let mut processor = SymbolProcessor::new(&config, &credentials, &runner, &mut store)?;
    let summary = run_batch(&mut processor, &symbols, today, &StdoutProgress)?;

    if let Some(notice) = failure_notice(&summary) {
        tracing::warn!("{notice}");
    }

    Ok(())
}

/// One-line notice for a batch that finished with failed symbols. The
/// individual failures were already reported as they happened.
fn failure_notice(summary: &BatchSummary) -> Option<String> {
    if summary.all_succeeded() {
        return None;
    }
    Some(format!(
        "{} of {} symbol(s) failed; their watermarks were not advanced and they will be retried next run",
        summary.failed, summary.total
    ))
}

/// Symbols to process, in config order.
fn select_symbols(config: &PipelineConfig, only: &[String]) -> Result<Vec<SymbolEntry>> {
    if only.is_empty() {
        return Ok(config.symbols.clone());
    }
    for id in only {
        if config.symbol(id).is_none() {
            bail!("unknown symbol '{id}' (not in config)");
        }
    }
    Ok(config
        .symbols
        .iter()
        .filter(|s| only.contains(&s.display_id))
        .cloned()
        .collect())
}

fn run_watermarks(config_path: &Path) -> Result<()> {
    let config = PipelineConfig::from_file(config_path)?;
    let store = WatermarkStore::open(&config.watermark_path);

    println!("Watermarks: {}", store.path().display());
    println!("Entries: {}", store.len());
    println!();
    println!("{:<16} {:<16} {:<12}", "Symbol", "Native", "Last Date");
    println!("{}", "-".repeat(46));

    for entry in &config.symbols {
        let last = store
            .get(&entry.display_id)
            .map(|d| d.to_string())
            .unwrap_or_else(|| "(never)".into());
        println!("{:<16} {:<16} {:<12}", entry.display_id, entry.native_id, last);
    }

    let orphans: Vec<_> = store
        .entries()
        .iter()
        .filter(|(id, _)| config.symbol(id).is_none())
        .collect();
    if !orphans.is_empty() {
        println!();
        println!("Not in config:");
        for (id, date) in orphans {
            println!("  {id} ({date})");
        }
    }

    Ok(())
}

fn run_reset(config_path: &Path, symbols: &[String], confirm: bool) -> Result<()> {
    let config = PipelineConfig::from_file(config_path)?;
    let mut store = WatermarkStore::open(&config.watermark_path);

    let present: Vec<&String> = symbols
        .iter()
        .filter(|id| store.get(id).is_some())
        .collect();

    if present.is_empty() {
        println!("No watermarks to reset.");
        return Ok(());
    }

    println!("Found {} watermark(s):", present.len());
    for id in &present {
        if let Some(date) = store.get(id) {
            println!("  {id} (through {date})");
        }
    }

    if !confirm {
        println!();
        println!("Dry run. Pass --confirm to actually reset.");
        return Ok(());
    }

    for id in present {
        store.remove(id)?;
        tracing::info!(symbol = %id, "watermark reset");
        println!("Reset: {id}");
    }

    Ok(())
}
