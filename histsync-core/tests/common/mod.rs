//! Shared fixtures: a temp workspace with a template and config, and a
//! scripted runner standing in for the export terminal and import CLI.

#![allow(dead_code)]

use chrono::NaiveDate;
use histsync_core::{ExitOutcome, Invocation, PipelineConfig, ProcessRunner};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const TEMPLATE: &str = "[Common]\nLogin=# Login\nPassword=# Password\n\
[Tester]\nExpert=# name_expert\nSymbol=# symbol\nPeriod=# time_frame\nModel=# Model\n\
FromDate=# init_date\nToDate=# end_date\n";

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn today() -> NaiveDate {
    d(2023, 6, 1)
}

/// A temp directory holding the template, export dir and watermark file.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("template.ini"), TEMPLATE).unwrap();
        fs::create_dir_all(dir.path().join("exports")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn export_dir(&self) -> PathBuf {
        self.root().join("exports")
    }

    pub fn watermark_path(&self) -> PathBuf {
        self.root().join("logs").join("watermarks.json")
    }

    /// Build a config for `symbols` (`(display_id, native_id)` pairs).
    pub fn config(&self, symbols: &[(&str, &str)], end_date: &str) -> PipelineConfig {
        let root = self.root().display().to_string();
        let mut toml = format!(
            r#"
timeframe = "M1"
mode = "default"
timezone = "UTC"
watermark_path = '{root}/logs/watermarks.json'

[window]
init_date = "2023-01-01"
end_date = "{end_date}"

[export]
executable = "terminal64.exe"
template = '{root}/template.ini'
rendered_config = '{root}/rendered/export.ini'
export_dir = '{root}/exports'

[import]
executable = "sqcli.exe"
symbol_postfix = "_M1"
instrument_postfix = "_FX"

[modes.default]
expert = "HistoryExport"
model = 1
"#
        );
        for (display_id, native_id) in symbols {
            toml.push_str(&format!(
                "\n[[symbols]]\ndisplay_id = \"{display_id}\"\nnative_id = \"{native_id}\"\n"
            ));
        }
        PipelineConfig::from_toml(&toml).unwrap()
    }
}

/// What the fake export terminal does for a given native id.
#[derive(Debug, Clone, Copy)]
pub enum ExportBehaviour {
    WriteCsv,
    ExitZeroNoFile,
    Exit(i32),
    SpawnFailure,
}

/// One recorded export run: the launch config the terminal saw.
#[derive(Debug, Clone)]
pub struct ExportCall {
    pub symbol: String,
    pub from: String,
    pub to: String,
}

/// Scripted stand-in for both external tools.
///
/// The export side reads the rendered launch config, like the real terminal,
/// and writes `{symbol}_Data.csv` into the export directory.
pub struct ScriptedRunner {
    export_exe: PathBuf,
    export_dir: PathBuf,
    export_behaviour: HashMap<String, ExportBehaviour>,
    import_exit: HashMap<String, i32>,
    pub invocations: RefCell<Vec<Invocation>>,
    pub exports: RefCell<Vec<ExportCall>>,
}

impl ScriptedRunner {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            export_exe: config.export.executable.clone(),
            export_dir: config.export.export_dir.clone(),
            export_behaviour: HashMap::new(),
            import_exit: HashMap::new(),
            invocations: RefCell::new(Vec::new()),
            exports: RefCell::new(Vec::new()),
        }
    }

    pub fn export(mut self, native_id: &str, behaviour: ExportBehaviour) -> Self {
        self.export_behaviour.insert(native_id.to_string(), behaviour);
        self
    }

    /// Exit code of the import for the given `symbol=` argument value.
    pub fn import_exit(mut self, symbol_arg: &str, code: i32) -> Self {
        self.import_exit.insert(symbol_arg.to_string(), code);
        self
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.borrow().len()
    }

    pub fn imports(&self) -> Vec<Invocation> {
        self.invocations
            .borrow()
            .iter()
            .filter(|inv| inv.program != self.export_exe)
            .cloned()
            .collect()
    }

    fn run_export(&self, invocation: &Invocation) -> ExitOutcome {
        let config_path = invocation.args[0].trim_start_matches("/config:");
        let rendered = fs::read_to_string(config_path).unwrap();
        let field = |key: &str| {
            rendered
                .lines()
                .find_map(|l| l.strip_prefix(&format!("{key}=")))
                .unwrap()
                .to_string()
        };
        let call = ExportCall {
            symbol: field("Symbol"),
            from: field("FromDate"),
            to: field("ToDate"),
        };

        let behaviour = self
            .export_behaviour
            .get(&call.symbol)
            .copied()
            .unwrap_or(ExportBehaviour::WriteCsv);
        let symbol = call.symbol.clone();
        self.exports.borrow_mut().push(call);

        match behaviour {
            ExportBehaviour::WriteCsv => {
                fs::write(
                    self.export_dir.join(format!("{symbol}_Data.csv")),
                    "date,open,high,low,close,volume\n2023.01.02 00:00,1.07,1.08,1.06,1.07,10\n",
                )
                .unwrap();
                ExitOutcome::Success
            }
            ExportBehaviour::ExitZeroNoFile => ExitOutcome::Success,
            ExportBehaviour::Exit(code) => ExitOutcome::Failed { code: Some(code) },
            ExportBehaviour::SpawnFailure => ExitOutcome::SpawnFailed {
                reason: "program not found".into(),
            },
        }
    }

    fn run_import(&self, invocation: &Invocation) -> ExitOutcome {
        let symbol = arg_value(invocation, "symbol").unwrap_or_default();
        match self.import_exit.get(&symbol).copied().unwrap_or(0) {
            0 => ExitOutcome::Success,
            code => ExitOutcome::Failed { code: Some(code) },
        }
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run(&self, invocation: &Invocation) -> ExitOutcome {
        self.invocations.borrow_mut().push(invocation.clone());
        if invocation.program == self.export_exe {
            self.run_export(invocation)
        } else {
            self.run_import(invocation)
        }
    }
}

/// Value of a `key=value` argument.
pub fn arg_value(invocation: &Invocation, key: &str) -> Option<String> {
    let prefix = format!("{key}=");
    invocation
        .args
        .iter()
        .find_map(|a| a.strip_prefix(&prefix))
        .map(str::to_string)
}

pub fn csv_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("csv"))
                .count()
        })
        .unwrap_or(0)
}
