use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::model::WorkspaceId;

/// Local state directory, relative to the project root.
pub const VELLUM_DIR: &str = ".vellum";
/// Human-edited mirror of the workspace document, relative to the project root.
pub const DESIGN_FILE: &str = "design.json";
/// Environment variable overriding the store URL.
pub const STORE_URL_ENV: &str = "VELLUM_STORE_URL";

const PROJECT_CONFIG_FILE: &str = "config.json";

/// `.vellum/config.json`: which hosted workspace this directory mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub store_url: String,
    pub workspace_id: WorkspaceId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthConfig {
    /// True when a session expiry is set and lies in the past.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            settle_ms: default_settle_ms(),
        }
    }
}

/// `$CONFIG_DIR/vellum/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub store_url: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub dev: DevConfig,
}

#[must_use]
pub fn vellum_dir(project_root: &Path) -> PathBuf {
    project_root.join(VELLUM_DIR)
}

#[must_use]
pub fn design_path(project_root: &Path) -> PathBuf {
    project_root.join(DESIGN_FILE)
}

/// Load `.vellum/config.json`. `Ok(None)` when the directory was never
/// initialized.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<Option<ProjectConfig>> {
    let path = vellum_dir(project_root).join(PROJECT_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    serde_json::from_str::<ProjectConfig>(&content)
        .map(Some)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Write `.vellum/config.json`, creating the directory if needed.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn save_project_config(project_root: &Path, config: &ProjectConfig) -> Result<()> {
    let dir = vellum_dir(project_root);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(PROJECT_CONFIG_FILE);
    let mut content = serde_json::to_string_pretty(config)?;
    content.push('\n');
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Path of the user config file, if the platform has a config directory.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vellum/config.toml"))
}

/// Load the user config from its default location. Missing file means
/// defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    match user_config_path() {
        Some(path) => load_user_config_from(&path),
        None => Ok(UserConfig::default()),
    }
}

/// Load the user config from `path`. Missing file means defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_user_config_from(path: &Path) -> Result<UserConfig> {
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Pick the store URL: flag, then `VELLUM_STORE_URL`, then the project's
/// recorded URL, then the user config.
#[must_use]
pub fn resolve_store_url(
    flag: Option<&str>,
    project: Option<&ProjectConfig>,
    user: &UserConfig,
) -> Option<String> {
    resolve_store_url_with_env(flag, env::var(STORE_URL_ENV).ok(), project, user)
}

fn resolve_store_url_with_env(
    flag: Option<&str>,
    env_url: Option<String>,
    project: Option<&ProjectConfig>,
    user: &UserConfig,
) -> Option<String> {
    let non_blank = |raw: &str| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    };
    flag.and_then(non_blank)
        .or_else(|| env_url.as_deref().and_then(non_blank))
        .or_else(|| project.and_then(|p| non_blank(p.store_url.as_str())))
        .or_else(|| user.store_url.as_deref().and_then(non_blank))
}

/// Turn a store URL into the SQLite database path it names.
///
/// Accepts `sqlite://<path>` and bare filesystem paths.
///
/// # Errors
///
/// Returns an error for empty URLs and for any other scheme.
pub fn sqlite_path_from_url(url: &str) -> Result<PathBuf> {
    let url = url.trim();
    if url.is_empty() {
        bail!("store URL is empty");
    }
    if let Some(path) = url.strip_prefix("sqlite://") {
        if path.is_empty() {
            bail!("store URL `{url}` has no database path");
        }
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = url.split_once("://") {
        bail!("unsupported store URL scheme `{scheme}` (expected sqlite://<path>)");
    }
    Ok(PathBuf::from(url))
}

/// Resolve output mode: `--json`, then `FORMAT`, then the user config, then
/// pretty on a terminal and text otherwise.
#[must_use]
pub fn resolve_output(cli_json: bool, user: &UserConfig) -> &'static str {
    resolve_output_with(cli_json, user.output.clone(), env::var("FORMAT").ok())
}

fn resolve_output_with(
    cli_json: bool,
    user_output: Option<String>,
    env_format: Option<String>,
) -> &'static str {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "plain" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json";
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return mode;
    }

    if let Some(mode) = user_output.as_deref().and_then(normalize_output_mode) {
        return mode;
    }

    if std::io::stdout().is_terminal() {
        "pretty"
    } else {
        "text"
    }
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_settle_ms() -> u64 {
    150
}
