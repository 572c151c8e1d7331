//! `vl undo` / `vl redo`: step the local store, rewrite `design.json`, and
//! push the resulting document to the hosted store.

use anyhow::Result;
use vellum_core::StepOutcome;

use super::{Globals, Project, write_design};
use crate::output::render;
use crate::sync::SyncWorker;

#[derive(Debug, Clone, Copy)]
enum Step {
    Undo,
    Redo,
}

pub fn run_undo(globals: &Globals) -> Result<()> {
    run_step(globals, Step::Undo)
}

pub fn run_redo(globals: &Globals) -> Result<()> {
    run_step(globals, Step::Redo)
}

fn run_step(globals: &Globals, step: Step) -> Result<()> {
    let project = Project::load(globals)?;
    let local = project.local()?;
    let id = &project.config.workspace_id;
    let outcome = match step {
        Step::Undo => local.undo(&project.caller, id)?,
        Step::Redo => local.redo(&project.caller, id)?,
    };

    if let Some(data) = &outcome.data {
        write_design(&project.root, data)?;
        let worker = SyncWorker::spawn(project.pusher(globals)?);
        worker.submit(data.clone());
        if let Some(err) = worker.shutdown() {
            return Err(err);
        }
    }

    render(globals.output, &outcome, |o: &StepOutcome, w| {
        match (&o.message, o.previous_version, o.current_version) {
            (Some(message), _, _) => writeln!(w, "{message}"),
            (None, Some(from), Some(to)) => {
                let verb = match step {
                    Step::Undo => "Undid",
                    Step::Redo => "Redid",
                };
                writeln!(w, "{verb}: position {from} -> {to}")
            }
            _ => Ok(()),
        }
    })
}
