#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use iam_command::commands::{AcceptAllCatalog, ExecutionCatalog};
use iam_command::crypto::AesGcmEncryption;
use iam_command::eventstore::{AppendEvent, EventLog, LogError, MemoryEventLog, Push, ReadFilter};
use iam_command::permission::{PermissionChecker, RolePermissionChecker};
use iam_command::{CommandContext, Commands};
use iam_events::{
    event_types, AggregateType, CryptoType, CryptoValue, ExecutionSetPayload, ExecutionTarget,
    StoredEvent, TargetAddedPayload, TargetRemovedPayload, TargetType,
};
use iam_id::{InstanceId, SequenceIdGenerator};

pub const ORG: &str = "org_acme";

pub fn encryption() -> AesGcmEncryption {
    AesGcmEncryption::new([42u8; 32])
}

/// Event log that lets a test commit events "concurrently": queued events
/// are written right before the next push is attempted.
#[derive(Default)]
pub struct InterleavingLog {
    pub inner: MemoryEventLog,
    before_push: Mutex<Vec<(InstanceId, Vec<AppendEvent>)>>,
}

impl InterleavingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn before_next_push(&self, instance_id: InstanceId, events: Vec<AppendEvent>) {
        self.before_push.lock().unwrap().push((instance_id, events));
    }
}

#[async_trait]
impl EventLog for InterleavingLog {
    async fn filter(
        &self,
        ctx: &CommandContext,
        filter: &ReadFilter,
    ) -> Result<Vec<StoredEvent>, LogError> {
        self.inner.filter(ctx, filter).await
    }

    async fn push(&self, ctx: &CommandContext, push: Push) -> Result<Vec<StoredEvent>, LogError> {
        let queued = std::mem::take(&mut *self.before_push.lock().unwrap());
        for (instance_id, events) in queued {
            self.inner.seed(instance_id, events)?;
        }
        self.inner.push(ctx, push).await
    }
}

pub struct Harness<L> {
    pub log: Arc<L>,
    pub commands: Commands,
    pub instance: InstanceId,
    pub ctx: CommandContext,
}

pub fn harness() -> Harness<MemoryEventLog> {
    harness_with(
        Arc::new(MemoryEventLog::new()),
        Arc::new(AcceptAllCatalog),
        Arc::new(RolePermissionChecker::new()),
    )
}

pub fn harness_with<L: EventLog + 'static>(
    log: Arc<L>,
    catalog: Arc<dyn ExecutionCatalog>,
    permissions: Arc<dyn PermissionChecker>,
) -> Harness<L> {
    let instance = InstanceId::new();
    let commands = Commands::builder(log.clone(), Arc::new(encryption()))
        .id_generator(Arc::new(SequenceIdGenerator::new("key")))
        .catalog(catalog)
        .permissions(permissions)
        .build()
        .unwrap();
    Harness {
        log,
        commands,
        instance,
        ctx: CommandContext::system(instance).with_resource_owner(ORG),
    }
}

pub fn signing_key() -> CryptoValue {
    CryptoValue {
        crypto_type: CryptoType::Encryption,
        algorithm: "aes-256-gcm".into(),
        key_id: "fixture".into(),
        crypted: vec![7; 16],
    }
}

pub fn target_added(owner: &str, id: &str) -> AppendEvent {
    AppendEvent::new(
        AggregateType::Target,
        id,
        owner,
        event_types::TARGET_ADDED,
        &TargetAddedPayload {
            name: format!("name-{id}"),
            target_type: TargetType::Webhook,
            endpoint: "https://example.com/hook".into(),
            timeout_ms: 10_000,
            interrupt_on_error: false,
            signing_key: signing_key(),
        },
    )
    .unwrap()
}

pub fn target_removed(owner: &str, id: &str) -> AppendEvent {
    AppendEvent::new(
        AggregateType::Target,
        id,
        owner,
        event_types::TARGET_REMOVED,
        &TargetRemovedPayload {
            name: format!("name-{id}"),
        },
    )
    .unwrap()
}

pub fn execution_set(owner: &str, id: &str, targets: Vec<ExecutionTarget>) -> AppendEvent {
    AppendEvent::new(
        AggregateType::Execution,
        id,
        owner,
        event_types::EXECUTION_SET,
        &ExecutionSetPayload { targets },
    )
    .unwrap()
}

/// Seeds `request/<name>` executions including each other per `edges`;
/// every execution also calls target `t1`.
pub fn include_graph(owner: &str, edges: &[(&str, &[&str])]) -> Vec<AppendEvent> {
    let mut events = vec![target_added(owner, "t1")];
    for (id, includes) in edges {
        let mut targets = vec![ExecutionTarget::target("t1")];
        targets.extend(
            includes
                .iter()
                .map(|include| ExecutionTarget::include(format!("request/{include}"))),
        );
        events.push(execution_set(owner, &format!("request/{id}"), targets));
    }
    events
}
