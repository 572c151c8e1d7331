//! `vl dev`: watch `design.json` and keep the local and hosted stores current.
//!
//! Each scan hashes the file with BLAKE3. A changed hash is re-read after the
//! settle delay; only a file that hashed the same twice is recorded. Accepted
//! changes are recorded in the local store and handed to the single-flight
//! [`SyncWorker`](crate::sync::SyncWorker).

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use vellum_core::config;
use vellum_core::store::FileStore;
use vellum_core::{Caller, VersionEngine, WorkspaceId};

use super::{Globals, Project};
use crate::output::render;
use crate::sync::SyncWorker;

#[derive(Args, Debug)]
pub struct DevArgs {
    /// Scan once, push, and exit.
    #[arg(long)]
    pub once: bool,

    /// Poll interval in milliseconds (default from config, else 500).
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DevOutput {
    recorded: bool,
    version: u64,
    event_version: u64,
    pushed: usize,
}

/// What a scan found.
#[derive(Debug, PartialEq)]
enum Scan {
    Unchanged,
    Unsettled,
    Changed { hash: blake3::Hash, data: Value },
    Invalid(blake3::Hash),
}

fn hash_file(path: &Path) -> Result<Option<(blake3::Hash, Vec<u8>)>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some((blake3::hash(&bytes), bytes))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("Failed to read {}", path.display())),
    }
}

fn scan(path: &Path, last: Option<blake3::Hash>, settle: Duration) -> Result<Scan> {
    let Some((hash, _)) = hash_file(path)? else {
        return Ok(Scan::Unchanged);
    };
    if Some(hash) == last {
        return Ok(Scan::Unchanged);
    }

    thread::sleep(settle);
    let Some((settled, bytes)) = hash_file(path)? else {
        return Ok(Scan::Unsettled);
    };
    if settled != hash {
        return Ok(Scan::Unsettled);
    }

    match serde_json::from_slice(&bytes) {
        Ok(data) => Ok(Scan::Changed { hash, data }),
        Err(err) => {
            warn!(path = %path.display(), "design file is not valid JSON: {err}");
            Ok(Scan::Invalid(hash))
        }
    }
}

/// Record `data` locally with the local version as the expected version.
/// Returns `true` when a change was recorded.
fn record_change(
    local: &VersionEngine<FileStore>,
    caller: &Caller,
    id: &WorkspaceId,
    data: &Value,
) -> Result<bool> {
    let ws = local
        .get(caller, id)?
        .ok_or_else(|| vellum_core::VellumError::NotFound(id.clone()))?;
    let outcome = local.update(caller, id, data, ws.version)?;
    if outcome.no_changes {
        debug!(workspace_id = %id, "design file matches the current document");
    }
    Ok(!outcome.no_changes)
}

/// One scan of the design file. Returns the data when a change was recorded.
/// `last` only moves past content that was handled, so a failed record is
/// retried on the next poll.
fn poll(
    path: &Path,
    last: &mut Option<blake3::Hash>,
    settle: Duration,
    local: &VersionEngine<FileStore>,
    caller: &Caller,
    id: &WorkspaceId,
) -> Result<Option<Value>> {
    match scan(path, *last, settle)? {
        Scan::Unchanged | Scan::Unsettled => Ok(None),
        Scan::Invalid(hash) => {
            *last = Some(hash);
            Ok(None)
        }
        Scan::Changed { hash, data } => {
            let changed = record_change(local, caller, id, &data)?;
            *last = Some(hash);
            Ok(changed.then_some(data))
        }
    }
}

/// A poll failure ends a `--once` run; a watching run logs it and carries on.
fn tolerate(result: Result<Option<Value>>, once: bool) -> Result<Option<Value>> {
    match result {
        Err(err) if !once => {
            warn!("{err:#}");
            Ok(None)
        }
        other => other,
    }
}

pub fn run_dev(args: &DevArgs, globals: &Globals) -> Result<()> {
    let project = Project::load(globals)?;
    let local = project.local()?;
    project.local_workspace(&local)?;
    let worker = SyncWorker::spawn(project.pusher(globals)?);

    let dev = &globals.user_config.dev;
    let interval = Duration::from_millis(args.interval_ms.unwrap_or(dev.poll_interval_ms));
    let settle = Duration::from_millis(dev.settle_ms);
    let path = config::design_path(&project.root);
    let id = &project.config.workspace_id;

    info!(workspace_id = %id, path = %path.display(), once = args.once, "watching design file");
    let mut last = None;
    let mut recorded = false;
    loop {
        let polled = poll(&path, &mut last, settle, &local, &project.caller, id);
        if let Some(data) = tolerate(polled, args.once)? {
            recorded = true;
            worker.submit(data);
        }

        if args.once {
            break;
        }
        if let Some(err) = worker.take_error() {
            warn!("{err:#}");
        }
        thread::sleep(interval);
    }

    let failure = worker.flush();
    let pushed = worker.pushed();
    drop(worker);
    if let Some(err) = failure {
        return Err(err);
    }
    let current = project.local_workspace(&local)?;
    let output = DevOutput {
        recorded,
        version: current.version,
        event_version: current.event_version,
        pushed,
    };
    render(globals.output, &output, |o, w| {
        if o.recorded {
            writeln!(
                w,
                "Recorded change at position {} (version {}), pushed {}",
                o.event_version, o.version, o.pushed
            )
        } else {
            writeln!(w, "No changes")
        }
    })
}
