//! Per-symbol processing: window → launch config → export → import →
//! watermark, with cleanup of the export directory after every attempt.
//!
//! The watermark is the only durable side effect and is written strictly
//! after both external steps report success and the export file was seen on
//! disk. Per-symbol failures come back as [`SymbolOutcome::Failed`]; only
//! conditions no other symbol could survive (unreadable template, a failed
//! watermark write) are returned as [`PipelineError`].

use chrono::NaiveDate;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, Credentials, PipelineConfig, SymbolEntry};
use crate::process::{ExitOutcome, ImportRequest, Invocation, ProcessRunner};
use crate::template::{render_launch_config, LaunchValues, TemplateError};
use crate::watermark::{WatermarkError, WatermarkStore};
use crate::window::{derive_window, DefaultWindow, ProcessingWindow, SkipReason, WindowDecision};

/// Errors that abort the whole batch.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("launch config error: {0}")]
    Template(#[from] TemplateError),

    #[error("watermark for '{symbol}' not advanced: {source}")]
    Watermark {
        symbol: String,
        #[source]
        source: WatermarkError,
    },
}

/// Which step a failed symbol stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Export process did not exit cleanly.
    Export,
    /// Export process exited 0 but wrote no file.
    MissingExport,
    /// Import process did not exit cleanly.
    Import,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureStage::Export => "export",
            FailureStage::MissingExport => "missing export",
            FailureStage::Import => "import",
        };
        f.write_str(name)
    }
}

/// Files removed from the export directory after an attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub failed: usize,
}

/// Terminal state of one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolOutcome {
    Skipped {
        reason: SkipReason,
    },
    Succeeded {
        window: ProcessingWindow,
        cleanup: CleanupReport,
    },
    Failed {
        window: ProcessingWindow,
        stage: FailureStage,
        reason: String,
        cleanup: CleanupReport,
    },
}

impl SymbolOutcome {
    pub fn cleanup(&self) -> CleanupReport {
        match self {
            SymbolOutcome::Skipped { .. } => CleanupReport::default(),
            SymbolOutcome::Succeeded { cleanup, .. } | SymbolOutcome::Failed { cleanup, .. } => {
                *cleanup
            }
        }
    }
}

enum StageResult {
    Imported,
    Failed { stage: FailureStage, reason: String },
}

/// Drives one symbol at a time through the export/import sequence.
pub struct SymbolProcessor<'a> {
    config: &'a PipelineConfig,
    defaults: DefaultWindow,
    credentials: &'a Credentials,
    runner: &'a dyn ProcessRunner,
    watermarks: &'a mut WatermarkStore,
}

impl<'a> SymbolProcessor<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        credentials: &'a Credentials,
        runner: &'a dyn ProcessRunner,
        watermarks: &'a mut WatermarkStore,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            defaults: config.default_window()?,
            config,
            credentials,
            runner,
            watermarks,
        })
    }

    /// Process one symbol as of `today`.
    pub fn process(
        &mut self,
        entry: &SymbolEntry,
        today: NaiveDate,
    ) -> Result<SymbolOutcome, PipelineError> {
        let symbol = entry.display_id.as_str();
        let watermark = self.watermarks.get(symbol);

        let window = match derive_window(&self.defaults, watermark, today) {
            WindowDecision::Process(window) => window,
            WindowDecision::Skip(reason) => {
                if matches!(reason, SkipReason::AlreadyCurrent { watermark } if watermark > today) {
                    warn!(symbol, %reason, %today, "watermark is ahead of the current date");
                }
                info!(symbol, %reason, "skipping");
                return Ok(SymbolOutcome::Skipped { reason });
            }
        };

        info!(
            symbol,
            native_id = %entry.native_id,
            %window,
            resumed = watermark.is_some(),
            "processing"
        );

        self.render(entry, window)?;

        let stages = self.run_stages(entry, window);
        let cleanup = cleanup_exports(&self.config.export.export_dir);

        match stages? {
            StageResult::Imported => {
                info!(symbol, through = %window.end_date, "import complete, watermark advanced");
                Ok(SymbolOutcome::Succeeded { window, cleanup })
            }
            StageResult::Failed { stage, reason } => Ok(SymbolOutcome::Failed {
                window,
                stage,
                reason,
                cleanup,
            }),
        }
    }

    fn render(&self, entry: &SymbolEntry, window: ProcessingWindow) -> Result<(), PipelineError> {
        let mode = self
            .config
            .mode_for(entry)
            .ok_or_else(|| ConfigError::UnknownMode {
                mode: entry.mode.clone().unwrap_or_else(|| self.config.mode.clone()),
                referenced_by: format!("symbol '{}'", entry.display_id),
            })?;

        let values = LaunchValues::new(
            &entry.native_id,
            self.config.timeframe_for(entry),
            mode,
            window,
            self.credentials,
        );
        render_launch_config(
            &self.config.export.template,
            &self.config.export.rendered_config,
            &values,
        )?;
        debug!(
            symbol = %entry.display_id,
            path = %self.config.export.rendered_config.display(),
            "launch config rendered"
        );
        Ok(())
    }

    fn run_stages(
        &mut self,
        entry: &SymbolEntry,
        window: ProcessingWindow,
    ) -> Result<StageResult, PipelineError> {
        let symbol = entry.display_id.as_str();
        let export = &self.config.export;
        let export_file = self.config.export_file(entry);

        // A file left by an interrupted run must not pass as this run's export.
        if let Err(e) = remove_stale_export(&export_file) {
            error!(
                symbol,
                path = %export_file.display(),
                error = %e,
                "cannot remove stale export file"
            );
            return Ok(StageResult::Failed {
                stage: FailureStage::Export,
                reason: format!("stale {} could not be removed: {e}", export_file.display()),
            });
        }

        let outcome = self
            .runner
            .run(&Invocation::export(&export.executable, &export.rendered_config));
        if !outcome.is_success() {
            error!(symbol, %outcome, "export failed");
            return Ok(failed(FailureStage::Export, &outcome));
        }

        if !export_file.is_file() {
            error!(
                symbol,
                path = %export_file.display(),
                "export reported success but wrote no file"
            );
            return Ok(StageResult::Failed {
                stage: FailureStage::MissingExport,
                reason: format!("{} not found", export_file.display()),
            });
        }
        info!(symbol, path = %export_file.display(), "export written");

        match count_data_rows(&export_file) {
            Ok(rows) => info!(symbol, rows, "export rows"),
            Err(e) => warn!(symbol, error = %e, "could not count export rows"),
        }

        let import = &self.config.import;
        let request = ImportRequest {
            symbol: format!("{}{}", entry.display_id, import.symbol_postfix),
            instrument: format!("{}{}", entry.native_id, import.instrument_postfix),
            filepath: export_file,
            timezone: self.config.timezone.clone(),
            extra_args: import.extra_args.clone(),
        };
        let outcome = self
            .runner
            .run(&Invocation::import(&import.executable, &request));
        if !outcome.is_success() {
            error!(symbol, %outcome, "import failed");
            return Ok(failed(FailureStage::Import, &outcome));
        }

        self.watermarks
            .update(symbol, window.end_date)
            .map_err(|source| PipelineError::Watermark {
                symbol: symbol.to_string(),
                source,
            })?;

        Ok(StageResult::Imported)
    }
}

fn failed(stage: FailureStage, outcome: &ExitOutcome) -> StageResult {
    StageResult::Failed {
        stage,
        reason: outcome.to_string(),
    }
}

fn remove_stale_export(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            warn!(path = %path.display(), "removed stale export file before export");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Number of data rows (header excluded) in an exported CSV.
pub fn count_data_rows(path: &Path) -> Result<usize, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let mut rows = 0;
    for record in reader.records() {
        record?;
        rows += 1;
    }
    Ok(rows)
}

/// Delete every `*.csv` file in `dir`.
///
/// Never fails: a missing directory is an empty report and individual
/// deletion failures are logged and counted.
pub fn cleanup_exports(dir: &Path) -> CleanupReport {
    cleanup_exports_with(dir, |path| fs::remove_file(path))
}

fn cleanup_exports_with<F>(dir: &Path, mut remove: F) -> CleanupReport
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut report = CleanupReport::default();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "export directory does not exist, nothing to clean");
            return report;
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot list export directory");
            return report;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_csv = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
        if !is_csv || !path.is_file() {
            continue;
        }

        match remove(&path) {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to delete export file");
                report.failed += 1;
            }
        }
    }

    debug!(
        dir = %dir.display(),
        removed = report.removed,
        failed = report.failed,
        "export directory cleaned"
    );
    report
}
