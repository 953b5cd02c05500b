//! Event envelope - the common wrapper for all events.

use chrono::{DateTime, Utc};
use iam_id::{AggregateSeq, EventId, InstanceId, RequestId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::EventError;

/// Actor type for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A human user.
    User,
    /// A machine identity (service account, API key).
    ServiceAccount,
    /// The system itself (setup, background jobs).
    #[default]
    System,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::User => write!(f, "user"),
            ActorType::ServiceAccount => write!(f, "service_account"),
            ActorType::System => write!(f, "system"),
        }
    }
}

/// Aggregate type for event routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    Target,
    Execution,
    WebKey,
}

impl AggregateType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Target => "target",
            AggregateType::Execution => "execution",
            AggregateType::WebKey => "web_key",
        }
    }
}

impl std::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AggregateType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "target" => Ok(AggregateType::Target),
            "execution" => Ok(AggregateType::Execution),
            "web_key" => Ok(AggregateType::WebKey),
            other => Err(EventError::UnknownAggregateType(other.to_string())),
        }
    }
}

/// The event envelope - common metadata for all events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<P> {
    /// Position in the instance's log, assigned on append.
    pub position: EventId,

    /// Commit time, assigned on append.
    pub created_at: DateTime<Utc>,

    /// Tenant the event belongs to.
    pub instance_id: InstanceId,

    /// Owner of the aggregate inside the instance (org or instance ID).
    pub resource_owner: String,

    pub aggregate_type: AggregateType,

    pub aggregate_id: String,

    /// Monotonic sequence within the aggregate.
    pub aggregate_seq: AggregateSeq,

    /// The event type (e.g., "target.added", "web_key.activated").
    pub event_type: String,

    /// Schema version for this event type.
    pub event_version: i32,

    pub actor_type: ActorType,

    pub actor_id: String,

    /// Request correlation ID for tracing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,

    /// Event-specific payload.
    pub payload: P,
}

/// An event as read back from the log, payload still undecoded.
pub type StoredEvent = EventEnvelope<serde_json::Value>;

impl<P> EventEnvelope<P> {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder<P> {
        EventEnvelopeBuilder::new()
    }
}

impl StoredEvent {
    /// Decodes the payload into `T`, rejecting versions other than 1.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, EventError> {
        if self.event_version != 1 {
            return Err(EventError::UnsupportedVersion {
                event_type: self.event_type.clone(),
                version: self.event_version,
            });
        }
        T::deserialize(&self.payload).map_err(|e| EventError::InvalidPayload {
            event_type: self.event_type.clone(),
            message: e.to_string(),
        })
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug)]
pub struct EventEnvelopeBuilder<P> {
    position: Option<EventId>,
    created_at: Option<DateTime<Utc>>,
    instance_id: Option<InstanceId>,
    resource_owner: Option<String>,
    aggregate_type: Option<AggregateType>,
    aggregate_id: Option<String>,
    aggregate_seq: Option<AggregateSeq>,
    event_type: Option<String>,
    event_version: i32,
    actor_type: ActorType,
    actor_id: String,
    request_id: Option<RequestId>,
    payload: Option<P>,
}

impl<P> EventEnvelopeBuilder<P> {
    pub fn new() -> Self {
        Self {
            position: None,
            created_at: None,
            instance_id: None,
            resource_owner: None,
            aggregate_type: None,
            aggregate_id: None,
            aggregate_seq: None,
            event_type: None,
            event_version: 1,
            actor_type: ActorType::System,
            actor_id: "system".to_string(),
            request_id: None,
            payload: None,
        }
    }

    pub fn position(mut self, position: EventId) -> Self {
        self.position = Some(position);
        self
    }

    pub fn created_at(mut self, ts: DateTime<Utc>) -> Self {
        self.created_at = Some(ts);
        self
    }

    pub fn instance(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn resource_owner(mut self, owner: impl Into<String>) -> Self {
        self.resource_owner = Some(owner.into());
        self
    }

    pub fn aggregate(mut self, agg_type: AggregateType, agg_id: impl Into<String>) -> Self {
        self.aggregate_type = Some(agg_type);
        self.aggregate_id = Some(agg_id.into());
        self
    }

    pub fn aggregate_seq(mut self, seq: AggregateSeq) -> Self {
        self.aggregate_seq = Some(seq);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn event_version(mut self, version: i32) -> Self {
        self.event_version = version;
        self
    }

    pub fn actor(mut self, actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        self.actor_type = actor_type;
        self.actor_id = actor_id.into();
        self
    }

    pub fn request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    pub fn payload(mut self, payload: P) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the event envelope.
    ///
    /// The resource owner defaults to the instance ID and the creation time
    /// to now.
    pub fn build(self) -> Result<EventEnvelope<P>, EventError> {
        let instance_id = self
            .instance_id
            .ok_or(EventError::MissingField("instance_id"))?;
        Ok(EventEnvelope {
            position: self.position.ok_or(EventError::MissingField("position"))?,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            resource_owner: self
                .resource_owner
                .unwrap_or_else(|| instance_id.to_string()),
            instance_id,
            aggregate_type: self
                .aggregate_type
                .ok_or(EventError::MissingField("aggregate_type"))?,
            aggregate_id: self
                .aggregate_id
                .ok_or(EventError::MissingField("aggregate_id"))?,
            aggregate_seq: self.aggregate_seq.unwrap_or(AggregateSeq::FIRST),
            event_type: self
                .event_type
                .ok_or(EventError::MissingField("event_type"))?,
            event_version: self.event_version,
            actor_type: self.actor_type,
            actor_id: self.actor_id,
            request_id: self.request_id,
            payload: self.payload.ok_or(EventError::MissingField("payload"))?,
        })
    }
}

impl<P> Default for EventEnvelopeBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}
