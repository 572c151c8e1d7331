use anyhow::Result;
use serde::Serialize;
use tracing::warn;
use vellum_core::{Workspace, WorkspaceId};

use super::{Globals, Project};
use crate::output::{pretty_kv, render};
use crate::sync::SyncState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Counters {
    version: u64,
    event_version: u64,
    max_event_version: u64,
}

impl From<&Workspace> for Counters {
    fn from(ws: &Workspace) -> Self {
        Self {
            version: ws.version,
            event_version: ws.event_version,
            max_event_version: ws.max_event_version,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    workspace_id: WorkspaceId,
    name: String,
    store_url: String,
    local: Counters,
    #[serde(skip_serializing_if = "Option::is_none")]
    hosted: Option<Counters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    synced_hosted_version: Option<u64>,
    replay_ok: bool,
}

/// Local and hosted version counters, plus a replay check of the local log.
pub fn run_status(globals: &Globals) -> Result<()> {
    let project = Project::load(globals)?;
    let id = &project.config.workspace_id;
    let local = project.local()?;
    let ws = project.local_workspace(&local)?;

    let replay_ok = match local.verify(&project.caller, id) {
        Ok(()) => true,
        Err(err) => {
            warn!(workspace_id = %id, "local replay check failed: {err}");
            false
        }
    };

    let hosted = project
        .hosted(globals)?
        .get(&project.caller, id)?
        .as_ref()
        .map(Counters::from);

    let output = StatusOutput {
        workspace_id: ws.id.clone(),
        name: ws.name.clone(),
        store_url: globals.store_url(Some(&project.config))?,
        local: Counters::from(&ws),
        hosted,
        synced_hosted_version: SyncState::load(&project.root)?.map(|s| s.hosted_version),
        replay_ok,
    };
    render(globals.output, &output, |o, w| {
        pretty_kv(w, "workspace", format!("{} ({})", o.name, o.workspace_id))?;
        pretty_kv(w, "store", &o.store_url)?;
        pretty_kv(
            w,
            "local",
            format!(
                "version {} at position {}/{}",
                o.local.version, o.local.event_version, o.local.max_event_version
            ),
        )?;
        match &o.hosted {
            Some(h) => pretty_kv(
                w,
                "hosted",
                format!(
                    "version {} at position {}/{}",
                    h.version, h.event_version, h.max_event_version
                ),
            )?,
            None => pretty_kv(w, "hosted", "not found")?,
        }
        if let Some(v) = o.synced_hosted_version {
            pretty_kv(w, "last synced", format!("hosted version {v}"))?;
        }
        pretty_kv(w, "replay", if o.replay_ok { "ok" } else { "MISMATCH" })
    })
}
