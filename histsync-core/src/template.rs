//! Launch config rendering.
//!
//! The export terminal is driven by an INI-style file. The template carries
//! `# token` placeholders that are substituted per symbol.

use chrono::NaiveDate;
use secrecy::ExposeSecret;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{Credentials, DataMode};
use crate::window::ProcessingWindow;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("launch config template {} not readable: {source}", .path.display())]
    TemplateMissing {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("write rendered launch config {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Values substituted into the launch config for one symbol.
#[derive(Debug)]
pub struct LaunchValues<'a> {
    pub expert: &'a str,
    /// Export-side symbol identifier.
    pub symbol: &'a str,
    pub credentials: &'a Credentials,
    pub timeframe: &'a str,
    pub init_date: NaiveDate,
    pub end_date: NaiveDate,
    pub model: i64,
}

impl<'a> LaunchValues<'a> {
    pub fn new(
        symbol: &'a str,
        timeframe: &'a str,
        mode: &'a DataMode,
        window: ProcessingWindow,
        credentials: &'a Credentials,
    ) -> Self {
        Self {
            expert: &mode.expert,
            symbol,
            credentials,
            timeframe,
            init_date: window.init_date,
            end_date: window.end_date,
            model: mode.model,
        }
    }

    fn replacements(&self) -> [(&'static str, String); 9] {
        [
            ("# name_expert", self.expert.to_string()),
            ("# symbol", self.symbol.to_string()),
            ("# Login", self.credentials.login.expose_secret().to_string()),
            ("# Password", self.credentials.password.expose_secret().to_string()),
            ("# expert_path", self.expert.to_string()),
            ("# time_frame", self.timeframe.to_string()),
            ("# init_date", self.init_date.format("%Y-%m-%d").to_string()),
            ("# end_date", self.end_date.format("%Y-%m-%d").to_string()),
            ("# Model", self.model.to_string()),
        ]
    }
}

/// Substitute every placeholder in `template`.
///
/// Line endings are preserved; lines without a placeholder pass through.
pub fn render(template: &str, values: &LaunchValues<'_>) -> String {
    let replacements = values.replacements();
    template
        .split_inclusive('\n')
        .map(|line| {
            let mut line = line.to_string();
            for (token, value) in &replacements {
                if line.contains(token) {
                    line = line.replace(token, value);
                }
            }
            line
        })
        .collect()
}

/// Read the template at `template_path`, render it, and write the result to
/// `output_path` (parent directories are created).
pub fn render_launch_config(
    template_path: &Path,
    output_path: &Path,
    values: &LaunchValues<'_>,
) -> Result<(), TemplateError> {
    let template =
        fs::read_to_string(template_path).map_err(|source| TemplateError::TemplateMissing {
            path: template_path.to_path_buf(),
            source,
        })?;

    let rendered = render(&template, values);

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| TemplateError::Write {
            path: output_path.to_path_buf(),
            source,
        })?;
    }
    fs::write(output_path, rendered).map_err(|source| TemplateError::Write {
        path: output_path.to_path_buf(),
        source,
    })
}
