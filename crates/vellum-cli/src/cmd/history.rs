use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use vellum_core::{Event, EventBody, EventId, Workspace};

use super::{Globals, Project};
use crate::output::{OutputMode, pretty_rule, render};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Show only the most recent N events.
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Print the document as it was at event position V.
    #[arg(long, value_name = "V")]
    pub show: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRow {
    event_id: EventId,
    position: u64,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    timestamp: DateTime<Utc>,
    summary: String,
    current: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryOutput {
    event_version: u64,
    max_event_version: u64,
    events: Vec<HistoryRow>,
}

fn summarize(event: &Event) -> String {
    match &event.body {
        EventBody::Patch { patches } => match patches.as_slice() {
            [only] => format!("{} {}", only.name(), only.path()),
            many => format!("{} operations", many.len()),
        },
        EventBody::Checkpoint { label } => format!("\"{label}\""),
    }
}

/// The patch event that produced the current position is the last live one
/// recorded at that position.
fn current_event(events: &[(EventId, Event)], ws: &Workspace) -> Option<EventId> {
    if ws.event_version == 0 {
        return None;
    }
    events
        .iter()
        .rev()
        .find(|(_, e)| !e.is_checkpoint() && e.version == ws.event_version)
        .map(|(id, _)| *id)
}

fn rows(events: Vec<(EventId, Event)>, ws: &Workspace, limit: Option<usize>) -> Vec<HistoryRow> {
    let current = current_event(&events, ws);
    let skip = limit.map_or(0, |n| events.len().saturating_sub(n));
    events
        .into_iter()
        .skip(skip)
        .map(|(event_id, event)| HistoryRow {
            event_id,
            position: event.version,
            kind: event.body.kind(),
            summary: summarize(&event),
            user_id: event.user_id,
            timestamp: event.timestamp,
            current: current == Some(event_id),
        })
        .collect()
}

pub fn run_history(args: &HistoryArgs, globals: &Globals) -> Result<()> {
    let project = Project::load(globals)?;
    let local = project.local()?;
    let id = &project.config.workspace_id;

    if let Some(position) = args.show {
        let state = local.state_at(&project.caller, id, position)?;
        return render(globals.output, &state, |s, w| {
            writeln!(w, "{}", serde_json::to_string_pretty(s).map_err(std::io::Error::other)?)
        });
    }

    let ws = project.local_workspace(&local)?;
    let events = local.history(&project.caller, id)?;
    let output = HistoryOutput {
        event_version: ws.event_version,
        max_event_version: ws.max_event_version,
        events: rows(events, &ws, args.limit),
    };

    let pretty = globals.output == OutputMode::Pretty;
    render(globals.output, &output, |o, w| {
        if o.events.is_empty() {
            return writeln!(w, "No events recorded");
        }
        if pretty {
            writeln!(
                w,
                "Position {} of {}",
                o.event_version, o.max_event_version
            )?;
            pretty_rule(w)?;
        }
        for row in &o.events {
            let marker = if row.current { "*" } else { " " };
            writeln!(
                w,
                "{marker} #{:<4} @{:<4} {:<10} {:<12} {}  {}",
                row.event_id,
                row.position,
                row.kind,
                row.user_id.as_deref().unwrap_or("-"),
                row.timestamp.format("%Y-%m-%d %H:%M:%S"),
                row.summary
            )?;
        }
        Ok(())
    })
}
