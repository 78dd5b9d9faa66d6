//! Progress reporting over the symbol list.

use crate::batch::BatchSummary;
use crate::pipeline::SymbolOutcome;

/// Progress callback for batch runs.
pub trait BatchProgress {
    /// Called before a symbol is processed.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// Called when a symbol reaches a terminal state.
    fn on_complete(&self, symbol: &str, index: usize, total: usize, outcome: &SymbolOutcome);

    /// Called once after the last symbol.
    fn on_batch_complete(&self, summary: &BatchSummary);
}

/// Prints one line per symbol to stdout.
pub struct StdoutProgress;

impl BatchProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] Processing {symbol}...", index + 1, total);
    }

    fn on_complete(&self, symbol: &str, _index: usize, _total: usize, outcome: &SymbolOutcome) {
        match outcome {
            SymbolOutcome::Skipped { reason } => println!("  SKIP: {symbol} ({reason})"),
            SymbolOutcome::Succeeded { window, .. } => println!("  OK: {symbol} ({window})"),
            SymbolOutcome::Failed { stage, reason, .. } => {
                println!("  FAIL: {symbol}: {stage}: {reason}")
            }
        }
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        println!(
            "\nBatch complete: {}/{} succeeded, {} skipped, {} failed",
            summary.succeeded, summary.total, summary.skipped, summary.failed
        );
    }
}

/// Reports nothing.
pub struct NoProgress;

impl BatchProgress for NoProgress {
    fn on_start(&self, _symbol: &str, _index: usize, _total: usize) {}

    fn on_complete(&self, _symbol: &str, _index: usize, _total: usize, _outcome: &SymbolOutcome) {}

    fn on_batch_complete(&self, _summary: &BatchSummary) {}
}
