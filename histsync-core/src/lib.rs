//! histsync core: incremental history export/import pipeline.
//!
//! For every configured symbol this crate:
//! - derives the date window from a persisted per-symbol watermark
//! - renders the export terminal's launch config from a template
//! - runs the export terminal, then verifies the CSV it wrote
//! - runs the import CLI on that CSV
//! - advances the watermark only after both steps succeeded
//! - clears the export directory after every attempt
//!
//! Symbols are processed strictly one after another; the external tools are
//! single-instance desktop applications.

pub mod batch;
pub mod config;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod template;
pub mod watermark;
pub mod window;

pub use batch::{run_batch, BatchSummary};
pub use config::{ConfigError, Credentials, DataMode, PipelineConfig, SymbolEntry};
pub use pipeline::{
    cleanup_exports, CleanupReport, FailureStage, PipelineError, SymbolOutcome, SymbolProcessor,
};
pub use process::{ExitOutcome, ImportRequest, Invocation, ProcessRunner, SystemRunner};
pub use progress::{BatchProgress, NoProgress, StdoutProgress};
pub use template::{render_launch_config, LaunchValues, TemplateError};
pub use watermark::{WatermarkError, WatermarkStore, Watermarks};
pub use window::{derive_window, DefaultWindow, ProcessingWindow, SkipReason, WindowDecision};
