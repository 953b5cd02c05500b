//! Batched existence checks.
//!
//! [`ExistenceModel`] loads the add and remove events of many aggregates in
//! one read and tracks which of the requested IDs currently exist.

use std::collections::BTreeSet;

use iam_events::{event_types, AggregateType, EventError, ExecutionEvent, StoredEvent};
use iam_id::InstanceId;

use crate::eventstore::ReadFilter;
use crate::write_model::{WriteModel, WriteModelBase};

/// Maps an event to "now exists" (`Some(true)`), "no longer exists"
/// (`Some(false)`), or no change.
pub type Classifier = fn(&StoredEvent) -> Result<Option<bool>, EventError>;

#[derive(Debug, Clone)]
pub struct ExistenceModel {
    base: WriteModelBase,
    aggregate_type: AggregateType,
    event_types: &'static [&'static str],
    classify: Classifier,
    requested: BTreeSet<String>,
    existing: BTreeSet<String>,
}

fn classify_target(event: &StoredEvent) -> Result<Option<bool>, EventError> {
    Ok(match event.event_type.as_str() {
        event_types::TARGET_ADDED => Some(true),
        event_types::TARGET_REMOVED => Some(false),
        _ => None,
    })
}

/// An execution exists while its target list is non-empty.
fn classify_execution(event: &StoredEvent) -> Result<Option<bool>, EventError> {
    Ok(match ExecutionEvent::decode(event)? {
        Some(ExecutionEvent::Set(set)) => Some(!set.targets.is_empty()),
        Some(ExecutionEvent::Removed) => Some(false),
        None => None,
    })
}

impl ExistenceModel {
    pub fn new<I, S>(
        instance_id: InstanceId,
        resource_owner: impl Into<String>,
        aggregate_type: AggregateType,
        event_types: &'static [&'static str],
        classify: Classifier,
        ids: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base: WriteModelBase::new(instance_id, "", resource_owner),
            aggregate_type,
            event_types,
            classify,
            requested: ids.into_iter().map(Into::into).collect(),
            existing: BTreeSet::new(),
        }
    }

    pub fn targets<I, S>(instance_id: InstanceId, resource_owner: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            instance_id,
            resource_owner,
            AggregateType::Target,
            &[event_types::TARGET_ADDED, event_types::TARGET_REMOVED],
            classify_target,
            ids,
        )
    }

    pub fn executions<I, S>(
        instance_id: InstanceId,
        resource_owner: impl Into<String>,
        ids: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            instance_id,
            resource_owner,
            AggregateType::Execution,
            &[event_types::EXECUTION_SET, event_types::EXECUTION_REMOVED],
            classify_execution,
            ids,
        )
    }

    pub fn requested(&self) -> &BTreeSet<String> {
        &self.requested
    }

    /// True when every requested ID exists. Vacuously true for none.
    pub fn all_exist(&self) -> bool {
        self.requested.iter().all(|id| self.existing.contains(id))
    }

    /// Requested IDs that do not exist, sorted.
    pub fn missing(&self) -> Vec<&str> {
        self.requested
            .iter()
            .filter(|id| !self.existing.contains(*id))
            .map(String::as_str)
            .collect()
    }
}

impl WriteModel for ExistenceModel {
    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn query(&self) -> ReadFilter {
        ReadFilter::new(self.base.instance_id)
            .resource_owner(self.base.resource_owner.clone())
            .aggregate_type(self.aggregate_type)
            .aggregate_ids(self.requested.iter().cloned())
            .event_types(self.event_types)
    }

    fn is_relevant(&self, event: &StoredEvent) -> bool {
        event.aggregate_type == self.aggregate_type && self.requested.contains(&event.aggregate_id)
    }

    fn reduce(&mut self) -> Result<(), EventError> {
        for event in &self.base.events {
            match (self.classify)(event)? {
                Some(true) => {
                    self.existing.insert(event.aggregate_id.clone());
                }
                Some(false) => {
                    self.existing.remove(&event.aggregate_id);
                }
                None => {}
            }
        }
        self.base.reduce();
        Ok(())
    }
}
