use chrono::{DateTime, Utc};
use iam_events::{
    event_types, AggregateType, CryptoValue, EventError, PublicKeyMaterial, StoredEvent,
    WebKeyConfig, WebKeyEvent,
};
use iam_id::{AggregateSeq, InstanceId};

use crate::eventstore::ReadFilter;
use crate::write_model::{ObjectDetails, WriteModel, WriteModelBase};

/// Lifecycle of a signing key.
///
/// `Initial` keys were generated but never used. Only one key of an
/// instance is `Active`; `Inactive` keys still verify what they signed.
/// `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebKeyState {
    Initial,
    Active,
    Inactive,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebKeyEntry {
    pub key_id: String,
    pub state: WebKeyState,
    pub config: WebKeyConfig,
    pub public_key: PublicKeyMaterial,
    pub private_key: CryptoValue,
    pub sequence: AggregateSeq,
    pub creation_date: DateTime<Utc>,
    pub change_date: DateTime<Utc>,
}

/// All web keys of one instance.
///
/// Every web key command loads the whole set, so its push condition
/// serializes concurrent rotations within an instance.
#[derive(Debug, Clone)]
pub struct WebKeysWriteModel {
    base: WriteModelBase,
    keys: Vec<WebKeyEntry>,
}

impl WebKeysWriteModel {
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            base: WriteModelBase::new(instance_id, "", instance_id.to_string()),
            keys: Vec::new(),
        }
    }

    /// Keys in the order they were added, removed ones included.
    pub fn keys(&self) -> &[WebKeyEntry] {
        &self.keys
    }

    pub fn key(&self, key_id: &str) -> Option<&WebKeyEntry> {
        self.keys.iter().find(|key| key.key_id == key_id)
    }

    pub fn active_key(&self) -> Option<&WebKeyEntry> {
        self.keys.iter().find(|key| key.state == WebKeyState::Active)
    }

    /// True if any key has not been removed.
    pub fn has_keys(&self) -> bool {
        self.keys
            .iter()
            .any(|key| key.state != WebKeyState::Removed)
    }

    pub fn details(&self, key_id: &str) -> ObjectDetails {
        let key = self.key(key_id);
        ObjectDetails {
            id: key_id.to_string(),
            resource_owner: self.base.resource_owner.clone(),
            sequence: key.map(|k| k.sequence),
            creation_date: key.map(|k| k.creation_date),
            event_date: key.map(|k| k.change_date),
        }
    }

    fn transition(&mut self, event: &StoredEvent, state: WebKeyState) {
        if let Some(key) = self
            .keys
            .iter_mut()
            .find(|key| key.key_id == event.aggregate_id)
        {
            key.state = state;
            key.sequence = event.aggregate_seq;
            key.change_date = event.created_at;
        }
    }
}

impl WriteModel for WebKeysWriteModel {
    fn base(&self) -> &WriteModelBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut WriteModelBase {
        &mut self.base
    }

    fn query(&self) -> ReadFilter {
        ReadFilter::new(self.base.instance_id)
            .resource_owner(self.base.resource_owner.clone())
            .aggregate_type(AggregateType::WebKey)
            .event_types(&[
                event_types::WEB_KEY_ADDED,
                event_types::WEB_KEY_ACTIVATED,
                event_types::WEB_KEY_DEACTIVATED,
                event_types::WEB_KEY_REMOVED,
            ])
    }

    fn reduce(&mut self) -> Result<(), EventError> {
        let events = std::mem::take(&mut self.base.events);
        for event in &events {
            match WebKeyEvent::decode(event)? {
                Some(WebKeyEvent::Added(added)) => {
                    let added = *added;
                    self.keys.push(WebKeyEntry {
                        key_id: event.aggregate_id.clone(),
                        state: WebKeyState::Initial,
                        config: added.config,
                        public_key: added.public_key,
                        private_key: added.private_key,
                        sequence: event.aggregate_seq,
                        creation_date: event.created_at,
                        change_date: event.created_at,
                    });
                }
                Some(WebKeyEvent::Activated) => self.transition(event, WebKeyState::Active),
                Some(WebKeyEvent::Deactivated) => self.transition(event, WebKeyState::Inactive),
                Some(WebKeyEvent::Removed) => self.transition(event, WebKeyState::Removed),
                None => {}
            }
        }
        self.base.events = events;
        self.base.reduce();
        Ok(())
    }
}
