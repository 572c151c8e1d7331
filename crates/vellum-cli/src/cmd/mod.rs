pub mod checkpoint;
pub mod completions;
pub mod dev;
pub mod history;
pub mod init;
pub mod pull;
pub mod status;
pub mod undo;

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use vellum_core::config::{self, ProjectConfig, UserConfig};
use vellum_core::store::{FileStore, SqliteStore};
use vellum_core::{Caller, ErrorCode, VersionEngine, Workspace};

use crate::identity;
use crate::output::OutputMode;
use crate::sync::{HostedPusher, SyncState};

/// Settings every command receives from `main`.
#[derive(Debug)]
pub struct Globals {
    pub root: PathBuf,
    pub user: Option<String>,
    pub store: Option<String>,
    pub quiet: bool,
    pub output: OutputMode,
    pub user_config: UserConfig,
}

impl Globals {
    pub fn caller(&self) -> Caller {
        identity::resolve_caller(self.user.as_deref(), &self.user_config.auth)
    }

    /// Resolve the hosted store URL for `project` (or for a directory not
    /// yet initialized).
    pub fn store_url(&self, project: Option<&ProjectConfig>) -> Result<String> {
        config::resolve_store_url(self.store.as_deref(), project, &self.user_config)
            .ok_or_else(|| SetupError::NoStore.into())
    }
}

/// Failures detected before any engine call.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("no vellum workspace in {}", .0.display())]
    NotInitialized(PathBuf),

    #[error("no hosted store configured")]
    NoStore,

    #[error("{} is already initialized (use --force to replace it)", .0.display())]
    AlreadyInitialized(PathBuf),
}

impl SetupError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized(_) => ErrorCode::NotInitialized,
            Self::NoStore => ErrorCode::StoreNotConfigured,
            Self::AlreadyInitialized(_) => ErrorCode::InvalidInput,
        }
    }
}

/// An initialized project directory.
pub struct Project {
    pub root: PathBuf,
    pub config: ProjectConfig,
    pub caller: Caller,
}

impl Project {
    pub fn load(globals: &Globals) -> Result<Self> {
        let config = config::load_project_config(&globals.root)?
            .ok_or_else(|| SetupError::NotInitialized(globals.root.clone()))?;
        Ok(Self {
            root: globals.root.clone(),
            config,
            caller: globals.caller(),
        })
    }

    pub fn local(&self) -> Result<VersionEngine<FileStore>> {
        let dir = config::vellum_dir(&self.root);
        let store = FileStore::open(&dir)
            .with_context(|| format!("Failed to open local store at {}", dir.display()))?;
        Ok(VersionEngine::new(store))
    }

    pub fn hosted(&self, globals: &Globals) -> Result<VersionEngine<SqliteStore>> {
        let url = globals.store_url(Some(&self.config))?;
        open_hosted(&url)
    }

    /// The local workspace, which must exist once the project is initialized.
    pub fn local_workspace(&self, local: &VersionEngine<FileStore>) -> Result<Workspace> {
        local
            .get(&self.caller, &self.config.workspace_id)?
            .ok_or_else(|| self.missing_local())
    }

    /// Gate failures read as "absent" in `get`; rerun through the gate so
    /// the user sees why.
    fn missing_local(&self) -> anyhow::Error {
        match vellum_core::gate::require_identity(&self.caller) {
            Err(err) => err.into(),
            Ok(_) => vellum_core::VellumError::NotFound(self.config.workspace_id.clone()).into(),
        }
    }

    pub fn pusher(&self, globals: &Globals) -> Result<HostedPusher> {
        let hosted = self.hosted(globals)?;
        let state = match SyncState::load(&self.root)? {
            Some(state) => state,
            None => {
                let ws = hosted
                    .get(&self.caller, &self.config.workspace_id)?
                    .ok_or_else(|| {
                        vellum_core::VellumError::NotFound(self.config.workspace_id.clone())
                    })?;
                tracing::warn!(
                    version = ws.version,
                    "no recorded hosted version; assuming the current one"
                );
                SyncState {
                    hosted_version: ws.version,
                }
            }
        };
        Ok(HostedPusher::new(
            hosted,
            self.caller.clone(),
            self.config.workspace_id.clone(),
            self.root.clone(),
            state,
        ))
    }
}

pub fn open_hosted(url: &str) -> Result<VersionEngine<SqliteStore>> {
    let path = config::sqlite_path_from_url(url)?;
    let store = SqliteStore::open(&path)
        .with_context(|| format!("Failed to open hosted store {url}"))?;
    Ok(VersionEngine::new(store))
}

/// Read `design.json`. `Ok(None)` when the file does not exist.
pub fn read_design(root: &Path) -> Result<Option<Value>> {
    let path = config::design_path(root);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .map(Some)
        .with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Rewrite `design.json` with `data`, pretty-printed.
pub fn write_design(root: &Path, data: &Value) -> Result<()> {
    let path = config::design_path(root);
    let mut content = serde_json::to_string_pretty(data)?;
    content.push('\n');
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn globals(root: &Path) -> Globals {
        Globals {
            root: root.to_path_buf(),
            user: Some("alice".into()),
            store: None,
            quiet: true,
            output: OutputMode::Text,
            user_config: UserConfig::default(),
        }
    }

    #[test]
    fn design_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        assert!(read_design(dir.path()).expect("read").is_none());
        write_design(dir.path(), &json!({"title": "x"})).expect("write");
        assert_eq!(
            read_design(dir.path()).expect("read"),
            Some(json!({"title": "x"}))
        );
    }

    #[test]
    fn invalid_design_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(config::design_path(dir.path()), "{oops").expect("write");
        assert!(read_design(dir.path()).is_err());
    }

    #[test]
    fn uninitialized_project_reports_setup_error() {
        let dir = TempDir::new().expect("tempdir");
        let Err(err) = Project::load(&globals(dir.path())) else {
            panic!("expected an error");
        };
        assert!(matches!(
            err.downcast_ref::<SetupError>(),
            Some(SetupError::NotInitialized(_))
        ));
    }

    #[test]
    fn flag_store_url_wins() {
        let dir = TempDir::new().expect("tempdir");
        let mut g = globals(dir.path());
        g.store = Some("sqlite:///tmp/flag.db".into());
        assert_eq!(g.store_url(None).expect("url"), "sqlite:///tmp/flag.db");
    }

    #[test]
    fn setup_error_codes() {
        assert_eq!(SetupError::NoStore.code().code(), "E1003");
        assert_eq!(
            SetupError::NotInitialized(PathBuf::from("/x")).code(),
            ErrorCode::NotInitialized
        );
    }
}
