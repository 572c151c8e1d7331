use anyhow::Result;
use clap::Args;

use super::{Globals, Project};
use crate::output::render;

#[derive(Args, Debug)]
pub struct CheckpointArgs {
    /// Checkpoint label.
    pub name: String,
}

/// Bookmark the current local position.
pub fn run_checkpoint(args: &CheckpointArgs, globals: &Globals) -> Result<()> {
    let project = Project::load(globals)?;
    let local = project.local()?;
    let outcome = local.checkpoint(&project.caller, &project.config.workspace_id, &args.name)?;
    render(globals.output, &outcome, |o, w| {
        writeln!(
            w,
            "Checkpoint \"{}\" at position {} (event {})",
            o.label, o.event_version, o.event_id
        )
    })
}
