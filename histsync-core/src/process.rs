//! External process invocation.
//!
//! Both external tools are opaque: they are launched, waited on, and judged
//! by their exit status. [`ProcessRunner`] is the seam the symbol processor
//! talks to, so tests can script exit codes without real executables.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A fully-resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Arguments for one import run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub symbol: String,
    pub instrument: String,
    pub filepath: PathBuf,
    pub timezone: String,
    pub extra_args: Vec<String>,
}

impl Invocation {
    /// Export terminal started with a rendered launch config.
    pub fn export(executable: &Path, launch_config: &Path) -> Self {
        Self {
            program: executable.to_path_buf(),
            args: vec![format!("/config:{}", launch_config.display())],
        }
    }

    /// Import CLI in data-import mode. Row-level errors are ignored by the
    /// tool so one bad row cannot abort the import.
    pub fn import(executable: &Path, request: &ImportRequest) -> Self {
        let mut args = vec![
            "-data".to_string(),
            "action=import".to_string(),
            format!("symbol={}", request.symbol),
            format!("instrument={}", request.instrument),
            format!("filepath={}", request.filepath.display()),
            "errorhandling=ignore".to_string(),
            format!("timezone={}", request.timezone),
        ];
        args.extend(request.extra_args.iter().cloned());
        Self {
            program: executable.to_path_buf(),
            args,
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How an external process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// Non-zero exit; `code` is `None` when terminated by a signal.
    Failed { code: Option<i32> },
    TimedOut { after: Duration },
    SpawnFailed { reason: String },
    /// Started, but its exit status could not be collected.
    WaitFailed { reason: String },
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }
}

impl From<ExitStatus> for ExitOutcome {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            ExitOutcome::Success
        } else {
            ExitOutcome::Failed {
                code: status.code(),
            }
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Success => write!(f, "exit status 0"),
            ExitOutcome::Failed { code: Some(code) } => write!(f, "exit status {code}"),
            ExitOutcome::Failed { code: None } => write!(f, "terminated by signal"),
            ExitOutcome::TimedOut { after } => {
                write!(f, "timed out after {}s", after.as_secs())
            }
            ExitOutcome::SpawnFailed { reason } => write!(f, "failed to start: {reason}"),
            ExitOutcome::WaitFailed { reason } => write!(f, "wait failed: {reason}"),
        }
    }
}

/// Launches a process and blocks until it ends.
pub trait ProcessRunner {
    fn run(&self, invocation: &Invocation) -> ExitOutcome;
}

/// Runs real child processes with inherited stdio.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> ExitOutcome {
        tracing::debug!(command = %invocation, "launching");

        let mut child = match Command::new(&invocation.program)
            .args(&invocation.args)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ExitOutcome::SpawnFailed {
                    reason: e.to_string(),
                }
            }
        };

        match self.timeout {
            None => match child.wait() {
                Ok(status) => status.into(),
                Err(e) => ExitOutcome::WaitFailed {
                    reason: e.to_string(),
                },
            },
            Some(timeout) => wait_with_timeout(&mut child, timeout),
        }
    }
}

/// Poll the child until it exits or `timeout` elapses; on expiry the child is
/// killed and reaped.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> ExitOutcome {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return status.into(),
            Ok(None) => {}
            Err(e) => {
                return ExitOutcome::WaitFailed {
                    reason: e.to_string(),
                }
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            if let Err(e) = child.kill() {
                tracing::warn!(pid = child.id(), error = %e, "failed to kill timed-out process");
            }
            let _ = child.wait();
            return ExitOutcome::TimedOut { after: elapsed };
        }

        thread::sleep(POLL_INTERVAL.min(timeout - elapsed));
    }
}
