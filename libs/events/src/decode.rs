//! Closed decode enums, one per aggregate type.
//!
//! `decode` returns `Ok(None)` for event types the aggregate does not know,
//! so reducers can skip events written by newer code.

use crate::event_types;
use crate::types::*;
use crate::{EventError, StoredEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent {
    Added(TargetAddedPayload),
    Changed(TargetChangedPayload),
    Removed(TargetRemovedPayload),
}

impl TargetEvent {
    pub fn decode(event: &StoredEvent) -> Result<Option<Self>, EventError> {
        let decoded = match event.event_type.as_str() {
            event_types::TARGET_ADDED => Self::Added(event.decode_payload()?),
            event_types::TARGET_CHANGED => Self::Changed(event.decode_payload()?),
            event_types::TARGET_REMOVED => Self::Removed(event.decode_payload()?),
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    Set(ExecutionSetPayload),
    Removed,
}

impl ExecutionEvent {
    pub fn decode(event: &StoredEvent) -> Result<Option<Self>, EventError> {
        let decoded = match event.event_type.as_str() {
            event_types::EXECUTION_SET => Self::Set(event.decode_payload()?),
            event_types::EXECUTION_REMOVED => {
                event.decode_payload::<ExecutionRemovedPayload>()?;
                Self::Removed
            }
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebKeyEvent {
    Added(Box<WebKeyAddedPayload>),
    Activated,
    Deactivated,
    Removed,
}

impl WebKeyEvent {
    pub fn decode(event: &StoredEvent) -> Result<Option<Self>, EventError> {
        let decoded = match event.event_type.as_str() {
            event_types::WEB_KEY_ADDED => Self::Added(Box::new(event.decode_payload()?)),
            event_types::WEB_KEY_ACTIVATED => {
                event.decode_payload::<WebKeyActivatedPayload>()?;
                Self::Activated
            }
            event_types::WEB_KEY_DEACTIVATED => {
                event.decode_payload::<WebKeyDeactivatedPayload>()?;
                Self::Deactivated
            }
            event_types::WEB_KEY_REMOVED => {
                event.decode_payload::<WebKeyRemovedPayload>()?;
                Self::Removed
            }
            _ => return Ok(None),
        };
        Ok(Some(decoded))
    }
}
