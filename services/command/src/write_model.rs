//! Write models: per-command projections of an event stream.
//!
//! A write model declares the events it needs ([`WriteModel::query`]),
//! buffers them in log order ([`WriteModel::append_events`]) and folds the
//! buffer into typed state ([`WriteModel::reduce`]). Reducing empties the
//! buffer, so folding is incremental: the events a command appends are
//! applied to the same model without reading them back.

use chrono::{DateTime, Utc};
use iam_events::{EventError, StoredEvent};
use iam_id::{AggregateSeq, EventId, InstanceId};
use tracing::trace;

use crate::context::CommandContext;
use crate::error::CommandError;
use crate::eventstore::{EventLog, PushCondition, ReadFilter};

/// Details of the object a command wrote or found, scoped to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDetails {
    pub id: String,
    pub resource_owner: String,
    /// Sequence of the last event applied, `None` if nothing exists.
    pub sequence: Option<AggregateSeq>,
    pub creation_date: Option<DateTime<Utc>>,
    /// Time of the last event applied.
    pub event_date: Option<DateTime<Utc>>,
}

/// Bookkeeping shared by all write models.
#[derive(Debug, Clone)]
pub struct WriteModelBase {
    pub aggregate_id: String,
    pub instance_id: InstanceId,
    pub resource_owner: String,
    /// Buffered events not yet reduced.
    pub events: Vec<StoredEvent>,
    /// Highest position handed to the model, relevant or not.
    pub observed_position: EventId,
    /// Highest position folded into the model.
    pub processed_position: EventId,
    pub processed_sequence: Option<AggregateSeq>,
    pub creation_date: Option<DateTime<Utc>>,
    pub change_date: Option<DateTime<Utc>>,
}

impl WriteModelBase {
    pub fn new(
        instance_id: InstanceId,
        aggregate_id: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            instance_id,
            resource_owner: resource_owner.into(),
            events: Vec::new(),
            observed_position: EventId::ZERO,
            processed_position: EventId::ZERO,
            processed_sequence: None,
            creation_date: None,
            change_date: None,
        }
    }

    /// Advances bookkeeping over the buffer and empties it.
    ///
    /// Models call this after folding their own fields.
    pub fn reduce(&mut self) {
        self.reduce_with(|_| false);
    }

    /// Like [`Self::reduce`] for models whose object can cease to exist.
    ///
    /// An event for which `ends_existence` holds clears the creation date,
    /// so the next event recreating the object sets it again.
    pub fn reduce_with(&mut self, ends_existence: impl Fn(&StoredEvent) -> bool) {
        for event in std::mem::take(&mut self.events) {
            self.processed_position = self.processed_position.max(event.position);
            self.processed_sequence = Some(event.aggregate_seq);
            if ends_existence(&event) {
                self.creation_date = None;
            } else if self.creation_date.is_none() {
                self.creation_date = Some(event.created_at);
            }
            self.change_date = Some(event.created_at);
        }
    }

    pub fn details(&self) -> ObjectDetails {
        ObjectDetails {
            id: self.aggregate_id.clone(),
            resource_owner: self.resource_owner.clone(),
            sequence: self.processed_sequence,
            creation_date: self.creation_date,
            event_date: self.change_date,
        }
    }
}

pub trait WriteModel: Send {
    fn base(&self) -> &WriteModelBase;

    fn base_mut(&mut self) -> &mut WriteModelBase;

    /// Events this model needs.
    fn query(&self) -> ReadFilter;

    /// Filters events before they are buffered.
    fn is_relevant(&self, _event: &StoredEvent) -> bool {
        true
    }

    /// Buffers relevant events in the given order.
    fn append_events(&mut self, events: &[StoredEvent]) {
        for event in events {
            let base = self.base_mut();
            base.observed_position = base.observed_position.max(event.position);
            if self.is_relevant(event) {
                self.base_mut().events.push(event.clone());
            }
        }
    }

    /// Folds the buffered events into the model.
    ///
    /// Unknown event types are skipped; a payload that fails to decode
    /// aborts the fold.
    fn reduce(&mut self) -> Result<(), EventError>;

    /// Condition making an append fail if anything this model reads changed
    /// since it was loaded.
    fn push_condition(&self) -> PushCondition {
        PushCondition {
            filter: self.query(),
            after: self.base().observed_position,
        }
    }
}

/// Executes the model's query and reduces the result.
pub async fn load<M>(log: &dyn EventLog, ctx: &CommandContext, model: &mut M) -> Result<(), CommandError>
where
    M: WriteModel + ?Sized,
{
    let events = log.filter(ctx, &model.query()).await?;
    trace!(
        aggregate_id = %model.base().aggregate_id,
        events = events.len(),
        "Loaded write model"
    );
    model.append_events(&events);
    model.reduce()?;
    Ok(())
}
