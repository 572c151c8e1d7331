use anyhow::Result;
use serde::Serialize;
use tracing::info;
use vellum_core::VellumError;

use super::{Globals, Project, write_design};
use crate::output::render;
use crate::sync::SyncState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullOutput {
    hosted_version: u64,
    local_version: u64,
    changed: bool,
}

/// Fetch the hosted document, record it locally, and rewrite `design.json`.
pub fn run_pull(globals: &Globals) -> Result<()> {
    let project = Project::load(globals)?;
    let id = &project.config.workspace_id;
    let hosted = project.hosted(globals)?;
    let remote = hosted
        .get(&project.caller, id)?
        .ok_or_else(|| VellumError::NotFound(id.clone()))?;

    let local = project.local()?;
    let mirror = project.local_workspace(&local)?;
    let outcome = local.update(&project.caller, id, &remote.current_data, mirror.version)?;
    write_design(&project.root, &remote.current_data)?;
    SyncState {
        hosted_version: remote.version,
    }
    .save(&project.root)?;
    info!(
        workspace_id = %id,
        hosted_version = remote.version,
        changed = !outcome.no_changes,
        "pulled hosted document"
    );

    let output = PullOutput {
        hosted_version: remote.version,
        local_version: outcome.version,
        changed: !outcome.no_changes,
    };
    render(globals.output, &output, |o, w| {
        if o.changed {
            writeln!(w, "Pulled hosted version {}", o.hosted_version)
        } else {
            writeln!(w, "Already up to date (hosted version {})", o.hosted_version)
        }
    })
}
