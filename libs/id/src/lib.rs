//! # iam-id
//!
//! Identifiers for the IAM command core.
//!
//! The tenant ([`InstanceId`]) and each request ([`RequestId`]) carry a
//! typed, prefixed ULID such as `inst_01HV4Z4NYPLTRS0JTUA8XDME5F`.
//!
//! Aggregates created by commands (targets, web keys) get opaque string IDs
//! from an [`IdGenerator`]. Executions are keyed by their condition path
//! (`request/<method>`, `event/<group>.*`), so the log treats every
//! aggregate ID as a plain string.
//!
//! [`EventId`] log positions and [`AggregateSeq`] sequences are assigned by
//! the log on append.

mod error;
mod generator;
mod macros;
mod types;

pub use error::IdError;
pub use generator::{IdGenerator, SequenceIdGenerator, UlidGenerator};
pub use macros::parse_prefixed;
pub use types::*;

pub use ulid::Ulid;
