//! Pipeline configuration loaded from a TOML file.
//!
//! The document describes both external tools (export terminal and import
//! CLI), the default date window, the data-loading modes and the ordered
//! symbol list. Credentials are deliberately absent from the file; they are
//! read from the environment by [`Credentials::from_env`].

use chrono::NaiveDate;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::window::DefaultWindow;

/// Environment variable holding the terminal login.
pub const LOGIN_ENV: &str = "Login";
/// Environment variable holding the terminal password.
pub const PASSWORD_ENV: &str = "Password";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors raised while loading or validating configuration. All of them are
/// fatal to the batch.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid date '{value}' for {field} (expected YYYY-MM-DD)")]
    InvalidDate { field: &'static str, value: String },

    #[error("window end_date {end} is earlier than init_date {init}")]
    InvertedWindow { init: NaiveDate, end: NaiveDate },

    #[error("symbol list is empty")]
    NoSymbols,

    #[error("duplicate symbol display_id '{0}'")]
    DuplicateSymbol(String),

    #[error("symbol entry #{index} has an empty {field}")]
    EmptyIdentifier { index: usize, field: &'static str },

    #[error("unknown data mode '{mode}' referenced by {referenced_by}")]
    UnknownMode { mode: String, referenced_by: String },

    #[error("process_timeout_secs must be greater than zero")]
    ZeroTimeout,

    #[error("environment variable '{0}' is not set")]
    MissingCredential(&'static str),
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Default timeframe rendered into the launch config.
    pub timeframe: String,
    /// Default data-loading mode (key into `modes`).
    pub mode: String,
    /// Timezone handed to the import tool.
    pub timezone: String,
    #[serde(default = "default_watermark_path")]
    pub watermark_path: PathBuf,
    /// Upper bound on each external process; absent means wait forever.
    #[serde(default)]
    pub process_timeout_secs: Option<u64>,
    pub window: WindowConfig,
    pub export: ExportConfig,
    pub import: ImportConfig,
    pub modes: BTreeMap<String, DataMode>,
    pub symbols: Vec<SymbolEntry>,
}

/// Default date range as written in the file.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    pub init_date: String,
    /// Empty or missing means "today".
    #[serde(default)]
    pub end_date: Option<String>,
}

/// Export terminal settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    pub executable: PathBuf,
    /// Launch config template containing `# placeholder` tokens.
    pub template: PathBuf,
    /// Where the per-symbol launch config is rendered.
    pub rendered_config: PathBuf,
    /// Directory the terminal writes `{native_id}_Data.csv` into.
    pub export_dir: PathBuf,
}

/// Import CLI settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportConfig {
    pub executable: PathBuf,
    #[serde(default)]
    pub symbol_postfix: String,
    #[serde(default)]
    pub instrument_postfix: String,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// A data-loading mode: which expert runs inside the terminal and with
/// which tick model.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DataMode {
    pub expert: String,
    pub model: i64,
}

/// One instrument to process.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SymbolEntry {
    /// Key for logging, watermarks and the import `symbol=` argument.
    pub display_id: String,
    /// Identifier understood by the export terminal.
    pub native_id: String,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

fn default_watermark_path() -> PathBuf {
    PathBuf::from("logs/watermarks.json")
}

impl PipelineConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every cross-field constraint that would otherwise surface
    /// halfway through a batch.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_window()?;

        if self.process_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }

        if !self.modes.contains_key(&self.mode) {
            return Err(ConfigError::UnknownMode {
                mode: self.mode.clone(),
                referenced_by: "global `mode`".into(),
            });
        }

        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }

        let mut seen = HashSet::new();
        for (index, entry) in self.symbols.iter().enumerate() {
            if entry.display_id.trim().is_empty() {
                return Err(ConfigError::EmptyIdentifier {
                    index,
                    field: "display_id",
                });
            }
            if entry.native_id.trim().is_empty() {
                return Err(ConfigError::EmptyIdentifier {
                    index,
                    field: "native_id",
                });
            }
            if !seen.insert(entry.display_id.as_str()) {
                return Err(ConfigError::DuplicateSymbol(entry.display_id.clone()));
            }
            if let Some(mode) = &entry.mode {
                if !self.modes.contains_key(mode) {
                    return Err(ConfigError::UnknownMode {
                        mode: mode.clone(),
                        referenced_by: format!("symbol '{}'", entry.display_id),
                    });
                }
            }
        }

        Ok(())
    }

    /// The configured default window, with dates parsed.
    pub fn default_window(&self) -> Result<DefaultWindow, ConfigError> {
        let init_date = parse_date("window.init_date", &self.window.init_date)?;
        let end_date = match self.window.end_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_date("window.end_date", raw)?),
        };
        if let Some(end) = end_date {
            if end < init_date {
                return Err(ConfigError::InvertedWindow {
                    init: init_date,
                    end,
                });
            }
        }
        Ok(DefaultWindow {
            init_date,
            end_date,
        })
    }

    /// Per-process timeout, if configured.
    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_secs.map(Duration::from_secs)
    }

    /// Timeframe for a symbol, falling back to the global default.
    pub fn timeframe_for<'a>(&'a self, entry: &'a SymbolEntry) -> &'a str {
        entry.timeframe.as_deref().unwrap_or(&self.timeframe)
    }

    /// Data mode for a symbol, falling back to the global default.
    ///
    /// Returns `None` only for configs that skipped [`validate`](Self::validate).
    pub fn mode_for(&self, entry: &SymbolEntry) -> Option<&DataMode> {
        let key = entry.mode.as_deref().unwrap_or(&self.mode);
        self.modes.get(key)
    }

    /// Path the export terminal is expected to write for a symbol.
    pub fn export_file(&self, entry: &SymbolEntry) -> PathBuf {
        self.export
            .export_dir
            .join(format!("{}_Data.csv", entry.native_id))
    }

    /// Look up a symbol by display id.
    pub fn symbol(&self, display_id: &str) -> Option<&SymbolEntry> {
        self.symbols.iter().find(|s| s.display_id == display_id)
    }
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| ConfigError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

/// Terminal login credentials, supplied out-of-band.
///
/// `Debug` is redacted by `secrecy`; the values are only exposed when the
/// launch config is rendered.
#[derive(Debug)]
pub struct Credentials {
    pub login: SecretString,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: SecretString::from(login.into()),
            password: SecretString::from(password.into()),
        }
    }

    /// Read `Login` and `Password` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let login = std::env::var(LOGIN_ENV).map_err(|_| ConfigError::MissingCredential(LOGIN_ENV))?;
        let password =
            std::env::var(PASSWORD_ENV).map_err(|_| ConfigError::MissingCredential(PASSWORD_ENV))?;
        Ok(Self::new(login, password))
    }
}
