//! Event log seam.
//!
//! The command core only needs two operations from the log: a filtered read
//! and an atomic, optionally conditioned append. [`EventLog`] captures both;
//! [`MemoryEventLog`] and [`crate::db::PgEventLog`] implement it.

mod memory;

pub use memory::MemoryEventLog;

use async_trait::async_trait;
use iam_events::{AggregateType, EventError, StoredEvent};
use iam_id::{EventId, InstanceId};
use serde::Serialize;
use thiserror::Error;

use crate::context::CommandContext;
use crate::db::DbError;

/// Errors returned by event log implementations.
#[derive(Debug, Error)]
pub enum LogError {
    /// Events matching the push condition were appended after the observed
    /// position. Nothing was written.
    #[error("concurrent modification: {message}")]
    Conflict { message: String },

    /// The request targets another instance than the context.
    #[error("instance mismatch: context {context}, requested {requested}")]
    TenantMismatch {
        context: InstanceId,
        requested: InstanceId,
    },

    #[error("operation canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("event log storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl LogError {
    pub fn conflict(message: impl Into<String>) -> Self {
        LogError::Conflict {
            message: message.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, LogError::Conflict { .. })
    }

    /// Message safe to hand to callers; storage details stay in logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            LogError::Conflict { .. } => "the resource was modified concurrently",
            LogError::TenantMismatch { .. } => "instance mismatch",
            LogError::Canceled => "the operation was canceled",
            LogError::DeadlineExceeded => "deadline exceeded",
            LogError::Storage(_) | LogError::Database(_) | LogError::Event(_) => {
                "internal event log error"
            }
        }
    }
}

/// Selects events from one instance's log.
///
/// Criteria are combined with AND; an empty list means "any".
#[derive(Debug, Clone, PartialEq)]
pub struct ReadFilter {
    pub instance_id: InstanceId,
    pub resource_owner: Option<String>,
    pub aggregate_types: Vec<AggregateType>,
    pub aggregate_ids: Vec<String>,
    pub event_types: Vec<String>,
    /// Top-level payload field that must equal the given value.
    pub payload_eq: Option<(String, serde_json::Value)>,
    pub position_after: Option<EventId>,
}

impl ReadFilter {
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            resource_owner: None,
            aggregate_types: Vec::new(),
            aggregate_ids: Vec::new(),
            event_types: Vec::new(),
            payload_eq: None,
            position_after: None,
        }
    }

    pub fn resource_owner(mut self, owner: impl Into<String>) -> Self {
        self.resource_owner = Some(owner.into());
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: AggregateType) -> Self {
        self.aggregate_types.push(aggregate_type);
        self
    }

    pub fn aggregate_id(mut self, id: impl Into<String>) -> Self {
        self.aggregate_ids.push(id.into());
        self
    }

    pub fn aggregate_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aggregate_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn event_types(mut self, event_types: &[&str]) -> Self {
        self.event_types
            .extend(event_types.iter().map(|t| (*t).to_string()));
        self
    }

    pub fn payload_eq(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.payload_eq = Some((field.into(), value));
        self
    }

    pub fn position_after(mut self, position: EventId) -> Self {
        self.position_after = Some(position);
        self
    }

    /// Evaluates the filter against a single event.
    pub fn matches(&self, event: &StoredEvent) -> bool {
        if event.instance_id != self.instance_id {
            return false;
        }
        if let Some(owner) = &self.resource_owner {
            if &event.resource_owner != owner {
                return false;
            }
        }
        if !self.aggregate_types.is_empty() && !self.aggregate_types.contains(&event.aggregate_type)
        {
            return false;
        }
        if !self.aggregate_ids.is_empty() && !self.aggregate_ids.contains(&event.aggregate_id) {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some((field, value)) = &self.payload_eq {
            if event.payload.get(field) != Some(value) {
                return false;
            }
        }
        if let Some(after) = self.position_after {
            if event.position <= after {
                return false;
            }
        }
        true
    }
}

/// An event to append. Position, sequence, time and actor are assigned by
/// the log from the push and its context.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendEvent {
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub resource_owner: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl AppendEvent {
    pub fn new<P: Serialize>(
        aggregate_type: AggregateType,
        aggregate_id: impl Into<String>,
        resource_owner: impl Into<String>,
        event_type: &str,
        payload: &P,
    ) -> Result<Self, EventError> {
        Ok(Self {
            aggregate_type,
            aggregate_id: aggregate_id.into(),
            resource_owner: resource_owner.into(),
            event_type: event_type.to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }
}

/// Rejects a push if any event matching `filter` is newer than `after`.
#[derive(Debug, Clone, PartialEq)]
pub struct PushCondition {
    pub filter: ReadFilter,
    pub after: EventId,
}

/// An atomic batch of events for one instance.
///
/// Every condition must hold for the batch to be written.
#[derive(Debug, Clone)]
pub struct Push {
    pub instance_id: InstanceId,
    pub events: Vec<AppendEvent>,
    pub conditions: Vec<PushCondition>,
}

impl Push {
    pub fn new(instance_id: InstanceId, events: Vec<AppendEvent>) -> Self {
        Self {
            instance_id,
            events,
            conditions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: PushCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_conditions(mut self, conditions: impl IntoIterator<Item = PushCondition>) -> Self {
        self.conditions.extend(conditions);
        self
    }
}

/// Append-only, instance-scoped event log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Returns matching events in position order.
    async fn filter(
        &self,
        ctx: &CommandContext,
        filter: &ReadFilter,
    ) -> Result<Vec<StoredEvent>, LogError>;

    /// Appends all events or none, returning them as committed.
    async fn push(&self, ctx: &CommandContext, push: Push) -> Result<Vec<StoredEvent>, LogError>;
}

/// Fails unless `requested` is the context's instance.
pub(crate) fn check_instance(ctx: &CommandContext, requested: InstanceId) -> Result<(), LogError> {
    if ctx.instance_id != requested {
        return Err(LogError::TenantMismatch {
            context: ctx.instance_id,
            requested,
        });
    }
    Ok(())
}
