//! How command results and failures reach the terminal.
//!
//! Handlers build a serializable result and pass it to [`render`] with a
//! closure for the human form. `--json` (or `FORMAT=json`, or `output` in
//! the user config) prints the value itself instead. Without any of those,
//! a terminal gets [`OutputMode::Pretty`] and a pipe gets
//! [`OutputMode::Text`].

use serde::Serialize;
use std::io::{self, Write};
use vellum_core::VellumError;
use vellum_core::config::{self, UserConfig};

use crate::cmd::SetupError;

const RULE_WIDTH: usize = 72;
const KEY_WIDTH: usize = 16;

/// Separator line under a pretty heading.
pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}", "-".repeat(RULE_WIDTH))
}

/// `key:` padded to a fixed column, then the value.
pub fn pretty_kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    let label = format!("{key}:");
    writeln!(w, "{label:<KEY_WIDTH$} {}", value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Pretty,
    Text,
    Json,
}

impl OutputMode {
    pub fn resolve(json_flag: bool, user: &UserConfig) -> Self {
        Self::from_name(config::resolve_output(json_flag, user))
    }

    fn from_name(name: &str) -> Self {
        match name {
            "json" => Self::Json,
            "text" => Self::Text,
            _ => Self::Pretty,
        }
    }
}

/// A failure as shown to the user. JSON output nests it under `"error"`.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Stable code such as `E2002`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            error_code: None,
        }
    }

    fn coded(message: String, code: vellum_core::ErrorCode, hint: Option<&str>) -> Self {
        Self {
            message,
            suggestion: hint.map(str::to_string),
            error_code: Some(code.code().to_string()),
        }
    }
}

impl From<&VellumError> for CliError {
    fn from(err: &VellumError) -> Self {
        Self::coded(err.to_string(), err.code(), err.hint())
    }
}

impl From<&SetupError> for CliError {
    fn from(err: &SetupError) -> Self {
        let code = err.code();
        Self::coded(err.to_string(), code, code.hint())
    }
}

/// Uses the first coded error found walking the chain; otherwise the whole
/// chain becomes the message.
impl From<&anyhow::Error> for CliError {
    fn from(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|cause| {
                cause
                    .downcast_ref::<VellumError>()
                    .map(Self::from)
                    .or_else(|| cause.downcast_ref::<SetupError>().map(Self::from))
            })
            .unwrap_or_else(|| Self::new(format!("{err:#}")))
    }
}

/// Print `value` to stdout: pretty JSON in JSON mode, `human` otherwise.
pub fn render<T: Serialize>(
    mode: OutputMode,
    value: &T,
    human: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    if mode == OutputMode::Json {
        serde_json::to_writer_pretty(&mut out, value)?;
        writeln!(out)?;
    } else {
        human(value, &mut out)?;
    }
    out.flush()?;
    Ok(())
}

/// Print a failure to stderr.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let mut out = io::stderr().lock();
    if mode == OutputMode::Json {
        serde_json::to_writer_pretty(&mut out, &serde_json::json!({ "error": error }))?;
        writeln!(out)?;
        return Ok(());
    }
    writeln!(out, "error: {}", error.message)?;
    if let Some(suggestion) = &error.suggestion {
        writeln!(out, "  suggestion: {suggestion}")?;
    }
    Ok(())
}
