//! Command handlers.
//!
//! Every command follows the same shape: validate the request, load the
//! write model it depends on, check preconditions against the folded state,
//! append the resulting events under the model's push condition, then fold
//! the committed events back into the same model to build the result.

mod execution;
mod execution_model;
mod include;
mod target;
mod target_model;
mod web_key;
mod web_key_model;

pub use execution::{
    AcceptAllCatalog, ApiCondition, EventCondition, ExecutionCatalog, ExecutionCondition,
    ExecutionKind, StaticCatalog,
};
pub use execution_model::ExecutionWriteModel;
pub use include::{
    check_for_include_cycles, IncludeCache, IncludeResolver, DEFAULT_MAX_INCLUDE_DEPTH,
};
pub use target::{AddTarget, AddedTarget, ChangeTarget, ChangedTarget};
pub use target_model::{TargetState, TargetWriteModel};
pub use web_key::CreatedWebKey;
pub use web_key_model::{WebKeyEntry, WebKeyState, WebKeysWriteModel};

use std::sync::Arc;

use iam_events::WebKeyConfig;
use iam_id::{IdGenerator, UlidGenerator};

use crate::context::CommandContext;
use crate::crypto::{WebKeyGenerator, EncryptionProvider, KeyGenerator};
use crate::error::CommandError;
use crate::eventstore::{AppendEvent, EventLog, Push, PushCondition};
use crate::permission::{PermissionChecker, RolePermissionChecker};
use crate::write_model::WriteModel;

/// Entry point for all commands. Cheap to clone.
#[derive(Clone)]
pub struct Commands {
    event_log: Arc<dyn EventLog>,
    encryption: Arc<dyn EncryptionProvider>,
    key_generator: Arc<dyn KeyGenerator>,
    id_generator: Arc<dyn IdGenerator>,
    permissions: Arc<dyn PermissionChecker>,
    catalog: Arc<dyn ExecutionCatalog>,
    max_include_depth: usize,
    web_key_config: WebKeyConfig,
}

impl std::fmt::Debug for Commands {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Commands")
            .field("max_include_depth", &self.max_include_depth)
            .field("web_key_config", &self.web_key_config)
            .finish_non_exhaustive()
    }
}

impl Commands {
    pub fn builder(
        event_log: Arc<dyn EventLog>,
        encryption: Arc<dyn EncryptionProvider>,
    ) -> CommandsBuilder {
        CommandsBuilder::new(event_log, encryption)
    }

    pub fn event_log(&self) -> &dyn EventLog {
        self.event_log.as_ref()
    }

    pub fn max_include_depth(&self) -> usize {
        self.max_include_depth
    }

    /// Appends `events` conditioned on `model`'s reads, then folds the
    /// committed events into `model`.
    async fn push_and_reduce<M>(
        &self,
        ctx: &CommandContext,
        model: &mut M,
        events: Vec<AppendEvent>,
    ) -> Result<(), CommandError>
    where
        M: WriteModel + ?Sized,
    {
        let condition = model.push_condition();
        self.push_with_conditions(ctx, vec![condition], model, events)
            .await
    }

    /// Like [`Self::push_and_reduce`] with conditions taken from other
    /// models, for commands whose invariant spans more than `model` reads.
    async fn push_with_conditions<M>(
        &self,
        ctx: &CommandContext,
        conditions: Vec<PushCondition>,
        model: &mut M,
        events: Vec<AppendEvent>,
    ) -> Result<(), CommandError>
    where
        M: WriteModel + ?Sized,
    {
        let push = Push::new(ctx.instance_id, events).with_conditions(conditions);
        let committed = self.event_log.push(ctx, push).await?;
        model.append_events(&committed);
        model.reduce()?;
        Ok(())
    }
}

/// Builds [`Commands`] from its collaborators.
///
/// Defaults: ULID IDs, Ed25519 web keys, a role checker that only admits the
/// system actor, a catalog that accepts every condition, and an include
/// depth of [`DEFAULT_MAX_INCLUDE_DEPTH`].
pub struct CommandsBuilder {
    event_log: Arc<dyn EventLog>,
    encryption: Arc<dyn EncryptionProvider>,
    key_generator: Arc<dyn KeyGenerator>,
    id_generator: Arc<dyn IdGenerator>,
    permissions: Arc<dyn PermissionChecker>,
    catalog: Arc<dyn ExecutionCatalog>,
    max_include_depth: usize,
    web_key_config: WebKeyConfig,
}

impl CommandsBuilder {
    pub fn new(event_log: Arc<dyn EventLog>, encryption: Arc<dyn EncryptionProvider>) -> Self {
        Self {
            event_log,
            encryption,
            key_generator: Arc::new(WebKeyGenerator),
            id_generator: Arc::new(UlidGenerator),
            permissions: Arc::new(RolePermissionChecker::new()),
            catalog: Arc::new(AcceptAllCatalog),
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            web_key_config: WebKeyConfig::default(),
        }
    }

    pub fn key_generator(mut self, key_generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn ExecutionCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn max_include_depth(mut self, depth: usize) -> Self {
        self.max_include_depth = depth;
        self
    }

    /// Config used for keys generated without an explicit one.
    pub fn web_key_config(mut self, config: WebKeyConfig) -> Self {
        self.web_key_config = config;
        self
    }

    pub fn build(self) -> Result<Commands, CommandError> {
        if self.max_include_depth == 0 {
            return Err(CommandError::invalid_argument(
                "invalid_max_include_depth",
                "max include depth must be at least 1",
            ));
        }
        Ok(Commands {
            event_log: self.event_log,
            encryption: self.encryption,
            key_generator: self.key_generator,
            id_generator: self.id_generator,
            permissions: self.permissions,
            catalog: self.catalog,
            max_include_depth: self.max_include_depth,
            web_key_config: self.web_key_config,
        })
    }
}
