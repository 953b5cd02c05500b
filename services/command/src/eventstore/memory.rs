//! In-process event log.
//!
//! Behaves like the Postgres log (positions, per-aggregate sequences,
//! conditional appends, instance isolation) and additionally records reads
//! and pushes so tests can assert on I/O.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use iam_events::{AggregateType, StoredEvent};
use iam_id::{AggregateSeq, EventId, InstanceId};
use tracing::debug;

use super::{check_instance, AppendEvent, EventLog, LogError, Push, ReadFilter};
use crate::context::CommandContext;

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<StoredEvent>,
    last_position: i64,
    filters: Vec<ReadFilter>,
    pushes: Vec<Push>,
    fail_next_push: bool,
}

/// Event log held in memory.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    state: Mutex<MemoryState>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, LogError> {
        self.state
            .lock()
            .map_err(|_| LogError::Storage("memory event log lock poisoned".to_string()))
    }

    /// Appends events without context or condition checks.
    ///
    /// Used to set up fixtures.
    pub fn seed(
        &self,
        instance_id: InstanceId,
        events: Vec<AppendEvent>,
    ) -> Result<Vec<StoredEvent>, LogError> {
        let mut state = self.lock()?;
        commit(&mut state, instance_id, events, &CommandContext::system(instance_id))
    }

    /// Makes the next push fail with a conflict, without writing.
    pub fn fail_next_push(&self) -> Result<(), LogError> {
        self.lock()?.fail_next_push = true;
        Ok(())
    }

    /// All committed events, in position order.
    pub fn events(&self) -> Vec<StoredEvent> {
        self.lock().map(|s| s.events.clone()).unwrap_or_default()
    }

    /// Filters executed through [`EventLog::filter`], in call order.
    pub fn recorded_filters(&self) -> Vec<ReadFilter> {
        self.lock().map(|s| s.filters.clone()).unwrap_or_default()
    }

    /// Pushes that were committed, in call order.
    pub fn recorded_pushes(&self) -> Vec<Push> {
        self.lock().map(|s| s.pushes.clone()).unwrap_or_default()
    }

    pub fn push_count(&self) -> usize {
        self.lock().map(|s| s.pushes.len()).unwrap_or_default()
    }
}

fn commit(
    state: &mut MemoryState,
    instance_id: InstanceId,
    events: Vec<AppendEvent>,
    ctx: &CommandContext,
) -> Result<Vec<StoredEvent>, LogError> {
    let created_at = Utc::now();
    let mut sequences: HashMap<(AggregateType, String), AggregateSeq> = HashMap::new();
    let mut committed = Vec::with_capacity(events.len());

    for event in events {
        let key = (event.aggregate_type, event.aggregate_id.clone());
        let seq = match sequences.get(&key) {
            Some(seq) => seq.next(),
            None => state
                .events
                .iter()
                .filter(|e| {
                    e.instance_id == instance_id
                        && e.aggregate_type == event.aggregate_type
                        && e.aggregate_id == event.aggregate_id
                })
                .map(|e| e.aggregate_seq.next())
                .max()
                .unwrap_or(AggregateSeq::FIRST),
        };
        sequences.insert(key, seq);
        state.last_position += 1;

        let stored = StoredEvent::builder()
            .position(EventId::new(state.last_position))
            .created_at(created_at)
            .instance(instance_id)
            .resource_owner(event.resource_owner)
            .aggregate(event.aggregate_type, event.aggregate_id)
            .aggregate_seq(seq)
            .event_type(event.event_type)
            .actor(ctx.actor_type, ctx.actor_id.clone())
            .request_id(ctx.request_id)
            .payload(event.payload)
            .build()?;
        committed.push(stored);
    }

    state.events.extend(committed.iter().cloned());
    Ok(committed)
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn filter(
        &self,
        ctx: &CommandContext,
        filter: &ReadFilter,
    ) -> Result<Vec<StoredEvent>, LogError> {
        ctx.ensure_active()?;
        check_instance(ctx, filter.instance_id)?;

        let mut state = self.lock()?;
        state.filters.push(filter.clone());
        Ok(state
            .events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect())
    }

    async fn push(&self, ctx: &CommandContext, push: Push) -> Result<Vec<StoredEvent>, LogError> {
        ctx.ensure_active()?;
        check_instance(ctx, push.instance_id)?;

        let mut state = self.lock()?;
        if std::mem::take(&mut state.fail_next_push) {
            return Err(LogError::conflict("injected push failure"));
        }

        for condition in &push.conditions {
            let newer = state
                .events
                .iter()
                .find(|e| e.position > condition.after && condition.filter.matches(e));
            if let Some(newer) = newer {
                debug!(
                    observed = %condition.after,
                    newer = %newer.position,
                    aggregate_id = %newer.aggregate_id,
                    "Push condition violated"
                );
                return Err(LogError::conflict(format!(
                    "aggregate {} changed after position {}",
                    newer.aggregate_id, condition.after
                )));
            }
        }

        let committed = commit(&mut state, push.instance_id, push.events.clone(), ctx)?;
        state.pushes.push(push);
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstore::PushCondition;
    use iam_events::{event_types, TargetRemovedPayload};

    fn removed(owner: &str, id: &str) -> AppendEvent {
        AppendEvent::new(
            AggregateType::Target,
            id,
            owner,
            event_types::TARGET_REMOVED,
            &TargetRemovedPayload {
                name: id.to_string(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_push_assigns_positions_and_sequences() {
        let instance = InstanceId::new();
        let ctx = CommandContext::system(instance);
        let log = MemoryEventLog::new();

        let committed = log
            .push(
                &ctx,
                Push::new(
                    instance,
                    vec![removed("o", "t1"), removed("o", "t1"), removed("o", "t2")],
                ),
            )
            .await
            .unwrap();

        let positions: Vec<i64> = committed.iter().map(|e| e.position.value()).collect();
        let seqs: Vec<i32> = committed.iter().map(|e| e.aggregate_seq.value()).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert_eq!(seqs, vec![1, 2, 1]);
        assert_eq!(committed[0].created_at, committed[2].created_at);
        assert_eq!(committed[0].request_id, Some(ctx.request_id));
    }

    #[tokio::test]
    async fn test_conditional_push_rejects_newer_events() {
        let instance = InstanceId::new();
        let ctx = CommandContext::system(instance);
        let log = MemoryEventLog::new();
        log.seed(instance, vec![removed("o", "t1")]).unwrap();

        let condition = PushCondition {
            filter: ReadFilter::new(instance).aggregate_id("t1"),
            after: EventId::ZERO,
        };
        let result = log
            .push(
                &ctx,
                Push::new(instance, vec![removed("o", "t1")]).with_condition(condition),
            )
            .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(log.events().len(), 1);
    }

    #[tokio::test]
    async fn test_conditional_push_accepts_unrelated_events() {
        let instance = InstanceId::new();
        let ctx = CommandContext::system(instance);
        let log = MemoryEventLog::new();
        log.seed(instance, vec![removed("o", "t2")]).unwrap();

        let condition = PushCondition {
            filter: ReadFilter::new(instance).aggregate_id("t1"),
            after: EventId::ZERO,
        };
        log.push(
            &ctx,
            Push::new(instance, vec![removed("o", "t1")]).with_condition(condition),
        )
        .await
        .unwrap();
        assert_eq!(log.push_count(), 1);
    }

    #[tokio::test]
    async fn test_every_condition_must_hold() {
        let instance = InstanceId::new();
        let ctx = CommandContext::system(instance);
        let log = MemoryEventLog::new();
        log.seed(instance, vec![removed("o", "t2")]).unwrap();

        let quiet = PushCondition {
            filter: ReadFilter::new(instance).aggregate_id("t1"),
            after: EventId::ZERO,
        };
        let busy = PushCondition {
            filter: ReadFilter::new(instance).aggregate_id("t2"),
            after: EventId::ZERO,
        };
        let result = log
            .push(
                &ctx,
                Push::new(instance, vec![removed("o", "t1")]).with_conditions([quiet, busy]),
            )
            .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(log.push_count(), 0);
    }

    #[tokio::test]
    async fn test_filter_rejects_foreign_instance() {
        let ctx = CommandContext::system(InstanceId::new());
        let log = MemoryEventLog::new();
        let result = log.filter(&ctx, &ReadFilter::new(InstanceId::new())).await;
        assert!(matches!(result, Err(LogError::TenantMismatch { .. })));
    }

    #[tokio::test]
    async fn test_events_of_other_instances_are_invisible() {
        let instance = InstanceId::new();
        let other = InstanceId::new();
        let log = MemoryEventLog::new();
        log.seed(other, vec![removed("o", "t1")]).unwrap();

        let ctx = CommandContext::system(instance);
        let events = log.filter(&ctx, &ReadFilter::new(instance)).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_injected_failure_writes_nothing() {
        let instance = InstanceId::new();
        let ctx = CommandContext::system(instance);
        let log = MemoryEventLog::new();
        log.fail_next_push().unwrap();

        let result = log.push(&ctx, Push::new(instance, vec![removed("o", "t1")])).await;
        assert!(result.unwrap_err().is_conflict());
        assert!(log.events().is_empty());

        log.push(&ctx, Push::new(instance, vec![removed("o", "t1")]))
            .await
            .unwrap();
        assert_eq!(log.events().len(), 1);
    }
}
