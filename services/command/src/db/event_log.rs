//! Postgres implementation of the event log.
//!
//! Appends for one instance are serialized by a transaction-scoped advisory
//! lock, so positions within an instance follow commit order and the push
//! condition can be evaluated inside the appending transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iam_events::{ActorType, AggregateType, StoredEvent};
use iam_id::{AggregateSeq, EventId, InstanceId, RequestId};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{PgConnection, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};

use super::DbError;
use crate::context::CommandContext;
use crate::eventstore::{check_instance, AppendEvent, EventLog, LogError, Push, ReadFilter};

const EVENT_COLUMNS: &str = "position, created_at, instance_id, resource_owner, aggregate_type, \
     aggregate_id, aggregate_seq, event_type, event_version, actor_type, actor_id, request_id, payload";

/// A row from the events table.
#[derive(Debug, Clone)]
struct EventRow {
    position: i64,
    created_at: DateTime<Utc>,
    instance_id: String,
    resource_owner: String,
    aggregate_type: String,
    aggregate_id: String,
    aggregate_seq: i32,
    event_type: String,
    event_version: i32,
    actor_type: String,
    actor_id: String,
    request_id: Option<String>,
    payload: serde_json::Value,
}

impl<'r> sqlx::FromRow<'r, PgRow> for EventRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            position: row.try_get("position")?,
            created_at: row.try_get("created_at")?,
            instance_id: row.try_get("instance_id")?,
            resource_owner: row.try_get("resource_owner")?,
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_seq: row.try_get("aggregate_seq")?,
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            actor_type: row.try_get("actor_type")?,
            actor_id: row.try_get("actor_id")?,
            request_id: row.try_get("request_id")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl EventRow {
    fn into_event(self) -> Result<StoredEvent, DbError> {
        let position = self.position;
        let corrupt = |message: String| DbError::CorruptRow { position, message };

        let instance_id: InstanceId = self
            .instance_id
            .parse()
            .map_err(|e| corrupt(format!("instance_id: {e}")))?;
        let aggregate_type: AggregateType = self
            .aggregate_type
            .parse()
            .map_err(|e| corrupt(format!("{e}")))?;
        let actor_type = match self.actor_type.as_str() {
            "user" => ActorType::User,
            "service_account" => ActorType::ServiceAccount,
            "system" => ActorType::System,
            other => return Err(corrupt(format!("unknown actor type: {other}"))),
        };
        let request_id = self
            .request_id
            .map(|id| id.parse::<RequestId>())
            .transpose()
            .map_err(|e| corrupt(format!("request_id: {e}")))?;

        Ok(StoredEvent {
            position: EventId::new(self.position),
            created_at: self.created_at,
            instance_id,
            resource_owner: self.resource_owner,
            aggregate_type,
            aggregate_id: self.aggregate_id,
            aggregate_seq: AggregateSeq::new(self.aggregate_seq),
            event_type: self.event_type,
            event_version: self.event_version,
            actor_type,
            actor_id: self.actor_id,
            request_id,
            payload: self.payload,
        })
    }
}

/// Appends the WHERE clause selecting events that match `filter`.
fn push_where(qb: &mut QueryBuilder<'_, Postgres>, filter: &ReadFilter) {
    qb.push(" WHERE instance_id = ")
        .push_bind(filter.instance_id.to_string());

    if let Some(owner) = &filter.resource_owner {
        qb.push(" AND resource_owner = ").push_bind(owner.clone());
    }
    if !filter.aggregate_types.is_empty() {
        let types: Vec<String> = filter
            .aggregate_types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        qb.push(" AND aggregate_type = ANY(").push_bind(types).push(")");
    }
    if !filter.aggregate_ids.is_empty() {
        qb.push(" AND aggregate_id = ANY(")
            .push_bind(filter.aggregate_ids.clone())
            .push(")");
    }
    if !filter.event_types.is_empty() {
        qb.push(" AND event_type = ANY(")
            .push_bind(filter.event_types.clone())
            .push(")");
    }
    if let Some((field, value)) = &filter.payload_eq {
        qb.push(" AND payload -> ")
            .push_bind(field.clone())
            .push(" = ")
            .push_bind(value.clone());
    }
    if let Some(after) = filter.position_after {
        qb.push(" AND position > ").push_bind(after.value());
    }
}

fn map_insert_error(err: sqlx::Error) -> LogError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return LogError::conflict("aggregate sequence already taken");
        }
    }
    LogError::Database(DbError::Query(err))
}

/// Event log stored in the `events` table.
#[derive(Clone)]
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn query(&self, filter: &ReadFilter) -> Result<Vec<StoredEvent>, LogError> {
        let mut qb = QueryBuilder::new(format!("SELECT {EVENT_COLUMNS} FROM events"));
        push_where(&mut qb, filter);
        qb.push(" ORDER BY position ASC");

        let rows = qb
            .build_query_as::<EventRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::Query)?;

        rows.into_iter()
            .map(|row| row.into_event().map_err(LogError::from))
            .collect()
    }

    async fn next_seq(
        conn: &mut PgConnection,
        instance_id: &str,
        event: &AppendEvent,
    ) -> Result<i32, LogError> {
        let seq: i32 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(aggregate_seq), 0) + 1
            FROM events
            WHERE instance_id = $1 AND aggregate_type = $2 AND aggregate_id = $3
            "#,
        )
        .bind(instance_id)
        .bind(event.aggregate_type.as_str())
        .bind(&event.aggregate_id)
        .fetch_one(conn)
        .await
        .map_err(DbError::Query)?;
        Ok(seq)
    }

    async fn append(&self, ctx: &CommandContext, push: Push) -> Result<Vec<StoredEvent>, LogError> {
        let instance_id = push.instance_id.to_string();
        let mut tx = self.pool.begin().await.map_err(DbError::Query)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&instance_id)
            .execute(&mut *tx)
            .await
            .map_err(DbError::Query)?;

        for condition in &push.conditions {
            let mut qb = QueryBuilder::new("SELECT EXISTS (SELECT 1 FROM events");
            push_where(
                &mut qb,
                &condition.filter.clone().position_after(condition.after),
            );
            qb.push(")");
            let changed: bool = qb
                .build_query_scalar::<bool>()
                .fetch_one(&mut *tx)
                .await
                .map_err(DbError::Query)?;
            if changed {
                debug!(observed = %condition.after, "Push condition violated");
                return Err(LogError::conflict(format!(
                    "events newer than position {} match the push condition",
                    condition.after
                )));
            }
        }

        let insert = format!(
            r#"
            INSERT INTO events (
                instance_id,
                resource_owner,
                aggregate_type,
                aggregate_id,
                aggregate_seq,
                event_type,
                event_version,
                actor_type,
                actor_id,
                request_id,
                payload
            )
            VALUES ($1, $2, $3, $4, $5, $6, 1, $7, $8, $9, $10)
            RETURNING {EVENT_COLUMNS}
            "#
        );

        let mut sequences: HashMap<(AggregateType, String), i32> = HashMap::new();
        let mut committed = Vec::with_capacity(push.events.len());

        for event in push.events {
            let key = (event.aggregate_type, event.aggregate_id.clone());
            let seq = match sequences.get(&key) {
                Some(seq) => seq + 1,
                None => Self::next_seq(&mut *tx, &instance_id, &event).await?,
            };
            sequences.insert(key, seq);

            let row = sqlx::query_as::<_, EventRow>(&insert)
                .bind(&instance_id)
                .bind(&event.resource_owner)
                .bind(event.aggregate_type.as_str())
                .bind(&event.aggregate_id)
                .bind(seq)
                .bind(&event.event_type)
                .bind(ctx.actor_type.to_string())
                .bind(&ctx.actor_id)
                .bind(ctx.request_id.to_string())
                .bind(&event.payload)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_insert_error)?;
            committed.push(row.into_event()?);
        }

        tx.commit().await.map_err(DbError::Query)?;
        Ok(committed)
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    #[instrument(skip(self, ctx, filter), fields(instance_id = %filter.instance_id))]
    async fn filter(
        &self,
        ctx: &CommandContext,
        filter: &ReadFilter,
    ) -> Result<Vec<StoredEvent>, LogError> {
        check_instance(ctx, filter.instance_id)?;
        ctx.guard(self.query(filter)).await
    }

    #[instrument(
        skip(self, ctx, push),
        fields(instance_id = %push.instance_id, events = push.events.len())
    )]
    async fn push(&self, ctx: &CommandContext, push: Push) -> Result<Vec<StoredEvent>, LogError> {
        check_instance(ctx, push.instance_id)?;
        if push.events.is_empty() {
            return Ok(Vec::new());
        }
        ctx.guard(self.append(ctx, push)).await
    }
}
