use iam_events::{
    event_types, AggregateType, CryptoValue, EventError, StoredEvent, TargetEvent, TargetType,
};
use iam_id::InstanceId;

use crate::eventstore::ReadFilter;
use crate::write_model::{WriteModel, WriteModelBase};

/// Folded state of an existing target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetState {
    pub name: String,
    pub target_type: TargetType,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub interrupt_on_error: bool,
    pub signing_key: CryptoValue,
}

#[derive(Debug, Clone)]
pub struct TargetWriteModel {
    base: WriteModelBase,
    state: Option<TargetState>,
}

impl TargetWriteModel {
    pub fn new(
        instance_id: InstanceId,
        target_id: impl Into<String>,
        resource_owner: impl Into<String>,
    ) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, target_id, resource_owner),
            state: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.state.is_some()
    }

    /// `None` until added and again after removal.
    pub fn state(&self) -> Option<&TargetState> {
        self.state.as_ref()
    }
}

impl WriteModel for TargetWriteModel {
    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn query(&self) -> ReadFilter {
        ReadFilter::new(self.base.instance_id)
            .resource_owner(self.base.resource_owner.clone())
            .aggregate_type(AggregateType::Target)
            .aggregate_id(self.base.aggregate_id.clone())
            .event_types(&[
                event_types::TARGET_ADDED,
                event_types::TARGET_CHANGED,
                event_types::TARGET_REMOVED,
            ])
    }

    fn is_relevant(&self, event: &StoredEvent) -> bool {
        event.aggregate_type == AggregateType::Target && event.aggregate_id == self.base.aggregate_id
    }

    fn reduce(&mut self) -> Result<(), EventError> {
        for event in &self.base.events {
            match TargetEvent::decode(event)? {
                Some(TargetEvent::Added(added)) => {
                    self.state = Some(TargetState {
                        name: added.name,
                        target_type: added.target_type,
                        endpoint: added.endpoint,
                        timeout_ms: added.timeout_ms,
                        interrupt_on_error: added.interrupt_on_error,
                        signing_key: added.signing_key,
                    });
                }
                Some(TargetEvent::Changed(changed)) => {
                    let Some(state) = self.state.as_mut() else {
                        continue;
                    };
                    if let Some(name) = changed.name {
                        state.name = name;
                    }
                    if let Some(target_type) = changed.target_type {
                        state.target_type = target_type;
                    }
                    if let Some(endpoint) = changed.endpoint {
                        state.endpoint = endpoint;
                    }
                    if let Some(timeout_ms) = changed.timeout_ms {
                        state.timeout_ms = timeout_ms;
                    }
                    if let Some(interrupt_on_error) = changed.interrupt_on_error {
                        state.interrupt_on_error = interrupt_on_error;
                    }
                    if let Some(signing_key) = changed.signing_key {
                        state.signing_key = signing_key;
                    }
                }
                Some(TargetEvent::Removed(_)) => self.state = None,
                None => {}
            }
        }
        self.base
            .reduce_with(|event| event.event_type == event_types::TARGET_REMOVED);
        Ok(())
    }
}

/// Targets of one owner that were ever added or renamed to `name`.
///
/// Only yields candidates: a candidate may have been renamed again or
/// removed since, so callers confirm against each [`TargetWriteModel`].
/// Its push condition fails if any target takes the name after loading.
#[derive(Debug, Clone)]
pub(crate) struct TargetNameModel {
    base: WriteModelBase,
    name: String,
    candidates: Vec<String>,
}

impl TargetNameModel {
    pub(crate) fn new(
        instance_id: InstanceId,
        resource_owner: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, "", resource_owner),
            name: name.into(),
            candidates: Vec::new(),
        }
    }

    pub(crate) fn candidates(&self) -> &[String] {
        &self.candidates
    }
}

impl WriteModel for TargetNameModel {
    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn query(&self) -> ReadFilter {
        ReadFilter::new(self.base.instance_id)
            .resource_owner(self.base.resource_owner.clone())
            .aggregate_type(AggregateType::Target)
            .event_types(&[event_types::TARGET_ADDED, event_types::TARGET_CHANGED])
            .payload_eq("name", serde_json::Value::String(self.name.clone()))
    }

    fn reduce(&mut self) -> Result<(), EventError> {
        for event in &self.base.events {
            if !self.candidates.contains(&event.aggregate_id) {
                self.candidates.push(event.aggregate_id.clone());
            }
        }
        self.base.reduce();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CommandContext;
    use crate::eventstore::{AppendEvent, MemoryEventLog};
    use crate::write_model::load;
    use iam_events::{CryptoType, TargetAddedPayload, TargetChangedPayload, TargetRemovedPayload};

    fn key() -> CryptoValue {
        CryptoValue {
            crypto_type: CryptoType::Encryption,
            algorithm: "aes-256-gcm".into(),
            key_id: "k".into(),
            crypted: vec![1, 2, 3],
        }
    }

    fn added(owner: &str, id: &str, name: &str) -> AppendEvent {
        AppendEvent::new(
            AggregateType::Target,
            id,
            owner,
            event_types::TARGET_ADDED,
            &TargetAddedPayload {
                name: name.into(),
                target_type: TargetType::Webhook,
                endpoint: "https://example.com/hook".into(),
                timeout_ms: 10_000,
                interrupt_on_error: false,
                signing_key: key(),
            },
        )
        .unwrap()
    }

    fn renamed(owner: &str, id: &str, name: &str) -> AppendEvent {
        AppendEvent::new(
            AggregateType::Target,
            id,
            owner,
            event_types::TARGET_CHANGED,
            &TargetChangedPayload {
                name: Some(name.into()),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_changes_apply_and_remove_resets() {
        let instance = InstanceId::new();
        let ctx = CommandContext::system(instance);
        let owner = ctx.resource_owner.clone();
        let log = MemoryEventLog::new();
        log.seed(
            instance,
            vec![
                added(&owner, "t1", "hook"),
                renamed(&owner, "t1", "renamed"),
                added(&owner, "t2", "other"),
            ],
        )
        .unwrap();

        let mut model = TargetWriteModel::new(instance, "t1", owner.clone());
        load(&log, &ctx, &mut model).await.unwrap();
        let state = model.state().unwrap();
        assert_eq!(state.name, "renamed");
        assert_eq!(state.endpoint, "https://example.com/hook");
        assert_eq!(model.base().details().sequence.map(|s| s.value()), Some(2));

        log.seed(
            instance,
            vec![AppendEvent::new(
                AggregateType::Target,
                "t1",
                owner.as_str(),
                event_types::TARGET_REMOVED,
                &TargetRemovedPayload {
                    name: "renamed".into(),
                },
            )
            .unwrap()],
        )
        .unwrap();
        let mut model = TargetWriteModel::new(instance, "t1", owner);
        load(&log, &ctx, &mut model).await.unwrap();
        assert!(!model.exists());
    }

    #[tokio::test]
    async fn test_name_model_collects_candidates() {
        let instance = InstanceId::new();
        let ctx = CommandContext::system(instance);
        let owner = ctx.resource_owner.clone();
        let log = MemoryEventLog::new();
        log.seed(
            instance,
            vec![
                added(&owner, "t1", "hook"),
                added(&owner, "t2", "other"),
                renamed(&owner, "t2", "hook"),
                renamed(&owner, "t1", "moved"),
                added("org_other", "t3", "hook"),
            ],
        )
        .unwrap();

        let mut model = TargetNameModel::new(instance, owner, "hook");
        load(&log, &ctx, &mut model).await.unwrap();
        assert_eq!(model.candidates(), ["t1".to_string(), "t2".to_string()]);
    }
}
