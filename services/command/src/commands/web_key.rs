//! Web key commands.
//!
//! Web keys sign tokens for an instance. At most one key of an instance is
//! active; activating another key deactivates the current one in the same
//! append, and the active key cannot be deleted.

use chrono::{DateTime, Utc};
use iam_events::{
    event_types, AggregateType, PublicKeyMaterial, WebKeyActivatedPayload, WebKeyAddedPayload,
    WebKeyConfig, WebKeyDeactivatedPayload, WebKeyRemovedPayload,
};
use tracing::{debug, info, instrument};

use super::web_key_model::{WebKeyState, WebKeysWriteModel};
use super::Commands;
use crate::context::CommandContext;
use crate::error::CommandError;
use crate::eventstore::AppendEvent;
use crate::permission::WEB_KEY_WRITE;
use crate::write_model::{load, ObjectDetails};

#[derive(Debug, Clone)]
pub struct CreatedWebKey {
    pub key_id: String,
    pub details: ObjectDetails,
    pub public_key: PublicKeyMaterial,
    /// Whether the key became the active key.
    pub active: bool,
}

fn activated(owner: &str, key_id: &str) -> Result<AppendEvent, CommandError> {
    Ok(AppendEvent::new(
        AggregateType::WebKey,
        key_id,
        owner,
        event_types::WEB_KEY_ACTIVATED,
        &WebKeyActivatedPayload {},
    )?)
}

impl Commands {
    /// Generates a key and appends it. The key is activated in the same
    /// append when the instance has no active key.
    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn create_web_key(
        &self,
        ctx: &CommandContext,
        config: Option<WebKeyConfig>,
    ) -> Result<CreatedWebKey, CommandError> {
        let config = config.unwrap_or(self.web_key_config);
        let owner = ctx.instance_id.to_string();
        self.permissions.check(ctx, WEB_KEY_WRITE, &owner).await?;

        let mut model = WebKeysWriteModel::new(ctx.instance_id);
        load(self.event_log.as_ref(), ctx, &mut model).await?;

        let (key_id, (added, public_key)) = self.generate_web_key(&owner, config)?;
        let mut events = vec![added];
        let activate = model.active_key().is_none();
        if activate {
            events.push(activated(&owner, &key_id)?);
        }
        self.push_and_reduce(ctx, &mut model, events).await?;

        info!(key_id = %key_id, active = activate, "Web key created");
        Ok(CreatedWebKey {
            details: model.details(&key_id),
            key_id,
            public_key,
            active: activate,
        })
    }

    /// Ensures the instance has keys: if none exist, creates an active key
    /// and an inactive successor in one append. Returns the created key IDs,
    /// empty if keys already existed.
    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn generate_initial_web_keys(
        &self,
        ctx: &CommandContext,
    ) -> Result<Vec<String>, CommandError> {
        let owner = ctx.instance_id.to_string();
        self.permissions.check(ctx, WEB_KEY_WRITE, &owner).await?;

        let mut model = WebKeysWriteModel::new(ctx.instance_id);
        load(self.event_log.as_ref(), ctx, &mut model).await?;
        if model.has_keys() {
            debug!(keys = model.keys().len(), "Web keys already exist");
            return Ok(Vec::new());
        }

        let (first_id, (first_added, _)) = self.generate_web_key(&owner, self.web_key_config)?;
        let (second_id, (second_added, _)) = self.generate_web_key(&owner, self.web_key_config)?;
        let events = vec![first_added, activated(&owner, &first_id)?, second_added];
        self.push_and_reduce(ctx, &mut model, events).await?;

        info!(active = %first_id, next = %second_id, "Initial web keys generated");
        Ok(vec![first_id, second_id])
    }

    /// Makes `key_id` the active key, deactivating the previous one.
    ///
    /// Appends nothing if the key is already active.
    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn activate_web_key(
        &self,
        ctx: &CommandContext,
        key_id: &str,
    ) -> Result<ObjectDetails, CommandError> {
        let owner = ctx.instance_id.to_string();
        self.permissions.check(ctx, WEB_KEY_WRITE, key_id).await?;

        let mut model = WebKeysWriteModel::new(ctx.instance_id);
        load(self.event_log.as_ref(), ctx, &mut model).await?;

        let state = model.key(key_id).map(|key| key.state);
        match state {
            None | Some(WebKeyState::Removed) => {
                return Err(CommandError::not_found(
                    "web_key_not_found",
                    format!("web key {key_id} not found"),
                ));
            }
            Some(WebKeyState::Active) => {
                debug!(key_id, "Web key already active");
                return Ok(model.details(key_id));
            }
            Some(WebKeyState::Initial | WebKeyState::Inactive) => {}
        }

        let mut events = vec![activated(&owner, key_id)?];
        let previous = model.active_key().map(|key| key.key_id.clone());
        if let Some(previous) = &previous {
            events.push(AppendEvent::new(
                AggregateType::WebKey,
                previous.as_str(),
                owner.as_str(),
                event_types::WEB_KEY_DEACTIVATED,
                &WebKeyDeactivatedPayload {},
            )?);
        }
        self.push_and_reduce(ctx, &mut model, events).await?;

        info!(key_id, previous = ?previous, "Web key activated");
        Ok(model.details(key_id))
    }

    /// Removes an inactive key and returns the removal time.
    ///
    /// Returns `None` without appending if the key does not exist or was
    /// already removed. Fails if the key is active.
    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn delete_web_key(
        &self,
        ctx: &CommandContext,
        key_id: &str,
    ) -> Result<Option<DateTime<Utc>>, CommandError> {
        let owner = ctx.instance_id.to_string();
        self.permissions.check(ctx, WEB_KEY_WRITE, key_id).await?;

        let mut model = WebKeysWriteModel::new(ctx.instance_id);
        load(self.event_log.as_ref(), ctx, &mut model).await?;

        match model.key(key_id).map(|key| key.state) {
            None | Some(WebKeyState::Removed) => {
                debug!(key_id, "Web key absent, nothing to delete");
                return Ok(None);
            }
            Some(WebKeyState::Active) => {
                return Err(CommandError::precondition_failed(
                    "web_key_active_delete",
                    "the active web key cannot be deleted",
                ));
            }
            Some(WebKeyState::Initial | WebKeyState::Inactive) => {}
        }

        let event = AppendEvent::new(
            AggregateType::WebKey,
            key_id,
            owner.as_str(),
            event_types::WEB_KEY_REMOVED,
            &WebKeyRemovedPayload {},
        )?;
        self.push_and_reduce(ctx, &mut model, vec![event]).await?;

        info!(key_id, "Web key deleted");
        Ok(model.details(key_id).event_date)
    }

    /// Fresh ID plus its `web_key.added` event and public key.
    fn generate_web_key(
        &self,
        owner: &str,
        config: WebKeyConfig,
    ) -> Result<(String, (AppendEvent, PublicKeyMaterial)), CommandError> {
        let key_id = self.id_generator.next_id()?;
        let (private_key, public_key) =
            self.key_generator
                .generate(&key_id, self.encryption.as_ref(), &config)?;
        let event = AppendEvent::new(
            AggregateType::WebKey,
            key_id.as_str(),
            owner,
            event_types::WEB_KEY_ADDED,
            &WebKeyAddedPayload {
                private_key,
                public_key: public_key.clone(),
                config,
            },
        )?;
        Ok((key_id, (event, public_key)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::test_support::commands;
    use crate::eventstore::MemoryEventLog;
    use crate::ErrorKind;
    use iam_id::InstanceId;

    use super::*;

    #[tokio::test]
    async fn test_create_activates_first_key_only() {
        let log = Arc::new(MemoryEventLog::new());
        let commands = commands(log.clone());
        let ctx = CommandContext::system(InstanceId::new());

        let first = commands.create_web_key(&ctx, None).await.unwrap();
        let second = commands.create_web_key(&ctx, None).await.unwrap();

        assert_eq!(first.key_id, "key1");
        assert!(first.active);
        assert!(!second.active);
        let types: Vec<_> = log.events().into_iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                event_types::WEB_KEY_ADDED,
                event_types::WEB_KEY_ACTIVATED,
                event_types::WEB_KEY_ADDED,
            ]
        );
    }

    #[tokio::test]
    async fn test_activate_unknown_key_is_not_found() {
        let log = Arc::new(MemoryEventLog::new());
        let commands = commands(log.clone());
        let ctx = CommandContext::system(InstanceId::new());

        let err = commands.activate_web_key(&ctx, "nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(log.push_count(), 0);
    }

    #[tokio::test]
    async fn test_initial_keys_are_generated_once() {
        let log = Arc::new(MemoryEventLog::new());
        let commands = commands(log.clone());
        let ctx = CommandContext::system(InstanceId::new());

        let created = commands.generate_initial_web_keys(&ctx).await.unwrap();
        assert_eq!(created, vec!["key1", "key2"]);
        assert!(commands.generate_initial_web_keys(&ctx).await.unwrap().is_empty());
        assert_eq!(log.push_count(), 1);
    }
}
