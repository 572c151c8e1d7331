use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;
use vellum_core::config::{self, ProjectConfig};
use vellum_core::store::FileStore;
use vellum_core::{VersionEngine, WorkspaceId};

use super::{Globals, SetupError, open_hosted, read_design, write_design};
use crate::output::{pretty_kv, render};
use crate::sync::SyncState;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Workspace name.
    pub name: String,

    /// Replace an existing local mirror.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitOutput {
    workspace_id: WorkspaceId,
    name: String,
    store_url: String,
    version: u64,
    created_design: bool,
}

pub fn run_init(args: &InitArgs, globals: &Globals) -> Result<()> {
    let root = &globals.root;
    let vellum_dir = config::vellum_dir(root);
    if config::load_project_config(root)?.is_some() || vellum_dir.join("head.json").exists() {
        if !args.force {
            return Err(SetupError::AlreadyInitialized(root.clone()).into());
        }
        std::fs::remove_dir_all(&vellum_dir)
            .with_context(|| format!("Failed to remove {}", vellum_dir.display()))?;
        info!(dir = %vellum_dir.display(), "removed existing local mirror");
    }

    let store_url = globals.store_url(None)?;
    let caller = globals.caller();
    let existing = read_design(root)?;
    let created_design = existing.is_none();
    let data = existing.unwrap_or_else(|| json!({}));

    let hosted = open_hosted(&store_url)?;
    let ws = hosted.create(&caller, &args.name, data.clone())?;

    let local = VersionEngine::new(FileStore::open(&vellum_dir)?);
    local.create_with_id(&caller, ws.id.clone(), &ws.name, data.clone())?;

    config::save_project_config(
        root,
        &ProjectConfig {
            store_url: store_url.clone(),
            workspace_id: ws.id.clone(),
        },
    )?;
    SyncState {
        hosted_version: ws.version,
    }
    .save(root)?;
    if created_design {
        write_design(root, &Value::Object(serde_json::Map::new()))?;
    }

    let output = InitOutput {
        workspace_id: ws.id,
        name: ws.name,
        store_url,
        version: ws.version,
        created_design,
    };
    render(globals.output, &output, |o, w| {
        writeln!(w, "Initialized workspace {} ({})", o.name, o.workspace_id)?;
        if !globals.quiet {
            pretty_kv(w, "store", &o.store_url)?;
            pretty_kv(w, "version", o.version.to_string())?;
            if o.created_design {
                pretty_kv(w, "design", "created empty design.json")?;
            }
        }
        Ok(())
    })
}
