//! vellum-core library.
//!
//! Event-sourced version control for JSON workspaces: a JSON-Patch diff/apply
//! layer, an append-only event log, the version engine (update, undo, redo,
//! checkpoint, replay), the ownership gate, and the store adapters it runs on.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums in the library ([`error::VellumError`],
//!   [`store::StoreError`], [`patch::PatchError`]); `anyhow::Result` only for
//!   configuration loading and opening the SQLite database.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod lock;
pub mod model;
pub mod patch;
pub mod replay;
pub mod store;

pub use engine::VersionEngine;
pub use error::{ErrorCode, VellumError};
pub use gate::Caller;
pub use model::{
    CheckpointOutcome, Event, EventBody, EventId, StepOutcome, UpdateOutcome, Workspace,
    WorkspaceFields, WorkspaceId,
};
pub use store::WorkspaceStore;
