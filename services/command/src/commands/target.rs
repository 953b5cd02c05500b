//! Target commands.
//!
//! A target is an endpoint executions call. Each target owns a signing key,
//! stored encrypted; its plaintext is only returned when it is created or
//! rotated.

use std::time::Duration;

use base64::Engine;
use iam_events::{
    event_types, AggregateType, TargetAddedPayload, TargetChangedPayload, TargetRemovedPayload,
    TargetType,
};
use rand::RngCore;
use tracing::{debug, info, instrument};

use super::target_model::{TargetNameModel, TargetWriteModel};
use super::Commands;
use crate::context::CommandContext;
use crate::error::CommandError;
use crate::eventstore::AppendEvent;
use crate::permission::TARGET_WRITE;
use crate::write_model::{load, ObjectDetails, WriteModel};

const SIGNING_KEY_BYTES: usize = 32;

// =============================================================================
// Request/Result Types
// =============================================================================

#[derive(Debug, Clone)]
pub struct AddTarget {
    pub name: String,
    pub target_type: TargetType,
    pub endpoint: String,
    pub timeout: Duration,
    pub interrupt_on_error: bool,
}

#[derive(Debug, Clone)]
pub struct AddedTarget {
    pub details: ObjectDetails,
    /// Plaintext signing key. Not retrievable later.
    pub signing_key: String,
}

/// Partial update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ChangeTarget {
    pub id: String,
    pub name: Option<String>,
    pub target_type: Option<TargetType>,
    pub endpoint: Option<String>,
    pub timeout: Option<Duration>,
    pub interrupt_on_error: Option<bool>,
    pub rotate_signing_key: bool,
}

#[derive(Debug, Clone)]
pub struct ChangedTarget {
    pub details: ObjectDetails,
    /// Set only if the key was rotated.
    pub signing_key: Option<String>,
}

fn validate_name(name: &str) -> Result<(), CommandError> {
    if name.trim().is_empty() {
        return Err(CommandError::invalid_argument(
            "target_name_invalid",
            "target name must not be empty",
        ));
    }
    Ok(())
}

fn validate_endpoint(endpoint: &str) -> Result<(), CommandError> {
    let host = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"));
    match host {
        Some(rest) if !rest.is_empty() && !rest.starts_with('/') && !rest.contains(' ') => Ok(()),
        _ => Err(CommandError::invalid_argument(
            "target_endpoint_invalid",
            format!("endpoint {endpoint:?} is not an http(s) URL"),
        )),
    }
}

fn timeout_ms(timeout: Duration) -> Result<u64, CommandError> {
    let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    if ms == 0 {
        return Err(CommandError::invalid_argument(
            "target_timeout_invalid",
            "timeout must be at least one millisecond",
        ));
    }
    Ok(ms)
}

impl AddTarget {
    pub fn validate(&self) -> Result<(), CommandError> {
        validate_name(&self.name)?;
        validate_endpoint(&self.endpoint)?;
        timeout_ms(self.timeout)?;
        Ok(())
    }
}

impl ChangeTarget {
    pub fn validate(&self) -> Result<(), CommandError> {
        if self.id.is_empty() {
            return Err(CommandError::invalid_argument(
                "target_id_missing",
                "target id is required",
            ));
        }
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(endpoint) = &self.endpoint {
            validate_endpoint(endpoint)?;
        }
        if let Some(timeout) = self.timeout {
            timeout_ms(timeout)?;
        }
        Ok(())
    }
}

// =============================================================================
// Commands
// =============================================================================

impl Commands {
    #[instrument(skip(self, ctx, request), fields(instance_id = %ctx.instance_id, name = %request.name))]
    pub async fn add_target(
        &self,
        ctx: &CommandContext,
        request: AddTarget,
    ) -> Result<AddedTarget, CommandError> {
        if ctx.resource_owner.is_empty() {
            return Err(CommandError::invalid_argument(
                "resource_owner_missing",
                "resource owner is required",
            ));
        }
        request.validate()?;

        let target_id = self.id_generator.next_id()?;
        self.permissions.check(ctx, TARGET_WRITE, &target_id).await?;

        let names = self.ensure_name_free(ctx, &request.name, None).await?;

        let mut model =
            TargetWriteModel::new(ctx.instance_id, target_id.clone(), ctx.resource_owner.clone());
        let (plain_key, signing_key) = self.generate_signing_key()?;
        let event = AppendEvent::new(
            AggregateType::Target,
            target_id.as_str(),
            ctx.resource_owner.as_str(),
            event_types::TARGET_ADDED,
            &TargetAddedPayload {
                name: request.name,
                target_type: request.target_type,
                endpoint: request.endpoint,
                timeout_ms: timeout_ms(request.timeout)?,
                interrupt_on_error: request.interrupt_on_error,
                signing_key,
            },
        )?;
        self.push_with_conditions(ctx, vec![names.push_condition()], &mut model, vec![event])
            .await?;

        info!(target_id = %target_id, "Target added");
        Ok(AddedTarget {
            details: model.base().details(),
            signing_key: plain_key,
        })
    }

    /// Applies the fields of `request` that differ from the current state.
    ///
    /// Appends nothing if no field differs and the key is not rotated.
    #[instrument(skip(self, ctx, request), fields(instance_id = %ctx.instance_id, target_id = %request.id))]
    pub async fn change_target(
        &self,
        ctx: &CommandContext,
        request: ChangeTarget,
    ) -> Result<ChangedTarget, CommandError> {
        if ctx.resource_owner.is_empty() {
            return Err(CommandError::invalid_argument(
                "resource_owner_missing",
                "resource owner is required",
            ));
        }
        request.validate()?;
        self.permissions.check(ctx, TARGET_WRITE, &request.id).await?;

        let mut model =
            TargetWriteModel::new(ctx.instance_id, request.id.clone(), ctx.resource_owner.clone());
        load(self.event_log.as_ref(), ctx, &mut model).await?;
        let Some(current) = model.state().cloned() else {
            return Err(CommandError::not_found(
                "target_not_found",
                format!("target {} not found", request.id),
            ));
        };

        let mut changes = TargetChangedPayload {
            name: request.name.filter(|name| *name != current.name),
            target_type: request
                .target_type
                .filter(|target_type| *target_type != current.target_type),
            endpoint: request
                .endpoint
                .filter(|endpoint| *endpoint != current.endpoint),
            timeout_ms: request
                .timeout
                .map(timeout_ms)
                .transpose()?
                .filter(|ms| *ms != current.timeout_ms),
            interrupt_on_error: request
                .interrupt_on_error
                .filter(|interrupt| *interrupt != current.interrupt_on_error),
            signing_key: None,
        };

        let mut conditions = vec![model.push_condition()];
        if let Some(name) = &changes.name {
            let names = self.ensure_name_free(ctx, name, Some(&request.id)).await?;
            conditions.push(names.push_condition());
        }

        let mut plain_key = None;
        if request.rotate_signing_key {
            let (plain, encrypted) = self.generate_signing_key()?;
            plain_key = Some(plain);
            changes.signing_key = Some(encrypted);
        }

        if changes.is_empty() {
            debug!("Target unchanged");
            return Ok(ChangedTarget {
                details: model.base().details(),
                signing_key: None,
            });
        }

        let event = AppendEvent::new(
            AggregateType::Target,
            request.id.as_str(),
            ctx.resource_owner.as_str(),
            event_types::TARGET_CHANGED,
            &changes,
        )?;
        self.push_with_conditions(ctx, conditions, &mut model, vec![event])
            .await?;

        info!(
            target_id = %request.id,
            rotated = plain_key.is_some(),
            "Target changed"
        );
        Ok(ChangedTarget {
            details: model.base().details(),
            signing_key: plain_key,
        })
    }

    #[instrument(skip(self, ctx), fields(instance_id = %ctx.instance_id))]
    pub async fn remove_target(
        &self,
        ctx: &CommandContext,
        target_id: &str,
    ) -> Result<ObjectDetails, CommandError> {
        if ctx.resource_owner.is_empty() {
            return Err(CommandError::invalid_argument(
                "resource_owner_missing",
                "resource owner is required",
            ));
        }
        if target_id.is_empty() {
            return Err(CommandError::invalid_argument(
                "target_id_missing",
                "target id is required",
            ));
        }
        self.permissions.check(ctx, TARGET_WRITE, target_id).await?;

        let mut model =
            TargetWriteModel::new(ctx.instance_id, target_id, ctx.resource_owner.clone());
        load(self.event_log.as_ref(), ctx, &mut model).await?;
        let Some(name) = model.state().map(|state| state.name.clone()) else {
            return Err(CommandError::not_found(
                "target_not_found",
                format!("target {target_id} not found"),
            ));
        };

        let event = AppendEvent::new(
            AggregateType::Target,
            target_id,
            ctx.resource_owner.as_str(),
            event_types::TARGET_REMOVED,
            &TargetRemovedPayload { name },
        )?;
        self.push_and_reduce(ctx, &mut model, vec![event]).await?;

        info!(target_id, "Target removed");
        Ok(model.base().details())
    }

    /// Fails with AlreadyExists if a target other than `except` currently
    /// holds `name`. Returns the loaded name model for use as push condition.
    async fn ensure_name_free(
        &self,
        ctx: &CommandContext,
        name: &str,
        except: Option<&str>,
    ) -> Result<TargetNameModel, CommandError> {
        let mut names = TargetNameModel::new(ctx.instance_id, ctx.resource_owner.clone(), name);
        load(self.event_log.as_ref(), ctx, &mut names).await?;

        for candidate in names.candidates() {
            if Some(candidate.as_str()) == except {
                continue;
            }
            let mut target =
                TargetWriteModel::new(ctx.instance_id, candidate.clone(), ctx.resource_owner.clone());
            load(self.event_log.as_ref(), ctx, &mut target).await?;
            if target.state().is_some_and(|state| state.name == name) {
                return Err(CommandError::already_exists(
                    "target_name_taken",
                    format!("a target named {name:?} already exists"),
                ));
            }
        }
        Ok(names)
    }

    /// Random signing key, returned as plaintext and encrypted.
    fn generate_signing_key(&self) -> Result<(String, iam_events::CryptoValue), CommandError> {
        let mut bytes = [0u8; SIGNING_KEY_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let plain = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
        let encrypted = self.encryption.encrypt(plain.as_bytes())?;
        Ok((plain, encrypted))
    }
}
