//! Batch driver. Runs the symbol processor over the configured list.

use chrono::NaiveDate;
use std::time::{Duration, Instant};

use crate::config::SymbolEntry;
use crate::pipeline::{PipelineError, SymbolOutcome, SymbolProcessor};
use crate::progress::BatchProgress;

/// Tally of one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `(display_id, reason)` for every failed symbol, in processing order.
    pub failures: Vec<(String, String)>,
    pub files_removed: usize,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Share of attempted symbols (skips excluded) that succeeded, in percent.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.total.saturating_sub(self.skipped);
        if attempted == 0 {
            0.0
        } else {
            (self.succeeded as f64 / attempted as f64) * 100.0
        }
    }

    fn record(&mut self, symbol: &str, outcome: &SymbolOutcome) {
        self.files_removed += outcome.cleanup().removed;
        match outcome {
            SymbolOutcome::Skipped { .. } => self.skipped += 1,
            SymbolOutcome::Succeeded { .. } => self.succeeded += 1,
            SymbolOutcome::Failed { stage, reason, .. } => {
                self.failed += 1;
                self.failures
                    .push((symbol.to_string(), format!("{stage}: {reason}")));
            }
        }
    }

    pub fn log_summary(&self) {
        tracing::info!(
            total = self.total,
            succeeded = self.succeeded,
            skipped = self.skipped,
            failed = self.failed,
            files_removed = self.files_removed,
            success_rate = %format!("{:.1}%", self.success_rate()),
            elapsed = %format!("{:.1}s", self.elapsed.as_secs_f64()),
            "batch complete"
        );
    }
}

/// Process `symbols` in order, one at a time.
///
/// A failed or skipped symbol never stops the loop; only a [`PipelineError`]
/// does, since it would affect every remaining symbol as well.
pub fn run_batch(
    processor: &mut SymbolProcessor<'_>,
    symbols: &[SymbolEntry],
    today: NaiveDate,
    progress: &dyn BatchProgress,
) -> Result<BatchSummary, PipelineError> {
    let started = Instant::now();
    let total = symbols.len();
    let mut summary = BatchSummary {
        total,
        ..BatchSummary::default()
    };

    for (i, entry) in symbols.iter().enumerate() {
        progress.on_start(&entry.display_id, i, total);

        let outcome = match processor.process(entry, today) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(symbol = %entry.display_id, error = %e, "aborting batch");
                return Err(e);
            }
        };

        progress.on_complete(&entry.display_id, i, total, &outcome);
        summary.record(&entry.display_id, &outcome);
    }

    summary.elapsed = started.elapsed();
    progress.on_batch_complete(&summary);
    summary.log_summary();

    Ok(summary)
}
