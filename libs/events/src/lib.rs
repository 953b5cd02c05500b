//! # iam-events
//!
//! Event definitions for the IAM command core.
//!
//! ## Design Principles
//!
//! - Events are immutable records of validated state transitions
//! - Private key material only ever appears encrypted ([`CryptoValue`])
//! - Every event belongs to exactly one aggregate inside one instance
//! - Events are versioned for schema evolution
//!
//! ## Event Envelope
//!
//! All events share a common envelope with:
//! - Global ordering (`position`)
//! - Aggregate ordering (`aggregate_type`, `aggregate_id`, `aggregate_seq`)
//! - Tenancy (`instance_id`, `resource_owner`)
//! - Audit context (`actor_type`, `actor_id`, `request_id`)
//!
//! ## Event Types
//!
//! - Target events (`target.*`)
//! - Execution events (`execution.*`)
//! - Web key events (`web_key.*`)
//!
//! Payloads are decoded through the closed enums in [`decode`]; event types
//! an aggregate does not know about decode to `None` so that readers skip
//! them.

pub mod decode;
mod envelope;
mod error;
mod types;

pub use decode::{ExecutionEvent, TargetEvent, WebKeyEvent};
pub use envelope::*;
pub use error::EventError;
pub use types::*;
