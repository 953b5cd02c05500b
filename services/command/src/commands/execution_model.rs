use iam_events::{event_types, AggregateType, EventError, ExecutionEvent, ExecutionTarget};
use iam_id::InstanceId;

use crate::eventstore::ReadFilter;
use crate::write_model::{WriteModel, WriteModelBase};

/// Current target list of one execution.
#[derive(Debug, Clone)]
pub struct ExecutionWriteModel {
    base: WriteModelBase,
    targets: Vec<ExecutionTarget>,
}

impl ExecutionWriteModel {
    pub fn new(
        instance_id: InstanceId,
        execution_id: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, execution_id, resource_owner),
            targets: Vec::new(),
        }
    }

    /// An execution without targets does not exist.
    pub fn exists(&self) -> bool {
        !self.targets.is_empty()
    }

    pub fn targets(&self) -> &[ExecutionTarget] {
        &self.targets
    }

    /// IDs of the executions this one includes, in list order.
    pub fn includes(&self) -> Vec<String> {
        self.targets
            .iter()
            .filter(|t| t.is_include())
            .map(|t| t.target.clone())
            .collect()
    }

    /// Order-sensitive comparison with a proposed target list.
    pub fn targets_equal(&self, targets: &[ExecutionTarget]) -> bool {
        self.targets == targets
    }
}

impl WriteModel for ExecutionWriteModel {
    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn query(&self) -> ReadFilter {
        ReadFilter::new(self.base.instance_id)
            .resource_owner(self.base.resource_owner.clone())
            .aggregate_type(AggregateType::Execution)
            .aggregate_id(self.base.aggregate_id.clone())
            .event_types(&[event_types::EXECUTION_SET, event_types::EXECUTION_REMOVED])
    }

    fn is_relevant(&self, event: &iam_events::StoredEvent) -> bool {
        event.aggregate_type == AggregateType::Execution
            && event.aggregate_id == self.base.aggregate_id
    }

    fn reduce(&mut self) -> Result<(), EventError> {
        let mut cleared = Vec::new();
        for event in &self.base.events {
            match ExecutionEvent::decode(event)? {
                Some(ExecutionEvent::Set(set)) => self.targets = set.targets,
                Some(ExecutionEvent::Removed) => self.targets.clear(),
                None => continue,
            }
            if self.targets.is_empty() {
                cleared.push(event.position);
            }
        }
        self.base.reduce_with(|event| cleared.contains(&event.position));
        Ok(())
    }
}
