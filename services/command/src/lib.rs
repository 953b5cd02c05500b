//! IAM command core.
//!
//! Commands read the current state of an aggregate by folding its events
//! into a write model, validate the request against that state, and append
//! new events atomically under optimistic concurrency.
//!
//! - [`eventstore`]: the event log seam, with an in-memory implementation
//! - [`db`]: the Postgres-backed event log
//! - [`write_model`] and [`exists`]: state reconstruction
//! - [`commands`]: targets, executions (with include validation) and web keys

pub mod commands;
pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod error;
pub mod eventstore;
pub mod exists;
pub mod permission;
pub mod write_model;

pub use commands::{Commands, CommandsBuilder};
pub use context::CommandContext;
pub use error::{CommandError, ErrorKind};
pub use write_model::ObjectDetails;
