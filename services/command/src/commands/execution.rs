//! Execution commands.
//!
//! An execution binds a condition (an API call, a function, or an event) to
//! an ordered list of targets and includes. Its aggregate ID is derived from
//! the condition, e.g. `request/iam.user.v1.UserService/AddUser`,
//! `function/preaccesstoken` or `event/user.*`.

use std::collections::HashSet;

use async_trait::async_trait;
use iam_events::{
    event_types, AggregateType, ExecutionRemovedPayload, ExecutionSetPayload, ExecutionTarget,
    ExecutionTargetKind,
};
use tracing::{debug, info, instrument};

use super::execution_model::ExecutionWriteModel;
use super::include::{check_for_include_cycles, IncludeCache, IncludeResolver};
use super::Commands;
use crate::context::CommandContext;
use crate::error::CommandError;
use crate::eventstore::{AppendEvent, EventLog};
use crate::exists::ExistenceModel;
use crate::permission::EXECUTION_WRITE;
use crate::write_model::{load, ObjectDetails, WriteModel};

// =============================================================================
// Conditions
// =============================================================================

/// Condition on a gRPC call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCondition {
    /// Full method name.
    Method(String),
    Service(String),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCondition {
    /// Single event type.
    Event(String),
    /// Every event type starting with `<group>.`.
    Group(String),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionCondition {
    Request(ApiCondition),
    Response(ApiCondition),
    Function(String),
    Event(EventCondition),
}

/// What an execution is attached to. Includes must not cross kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionKind {
    Request,
    Response,
    Function,
    Event,
}

impl ExecutionKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ExecutionKind::Request => "request",
            ExecutionKind::Response => "response",
            ExecutionKind::Function => "function",
            ExecutionKind::Event => "event",
        }
    }

    /// Kind encoded in an execution ID, if any.
    pub fn of_id(id: &str) -> Option<Self> {
        let prefix = id.split_once('/').map_or(id, |(prefix, _)| prefix);
        match prefix {
            "request" => Some(ExecutionKind::Request),
            "response" => Some(ExecutionKind::Response),
            "function" => Some(ExecutionKind::Function),
            "event" => Some(ExecutionKind::Event),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn require_name(name: &str, what: &str) -> Result<(), CommandError> {
    if name.trim().is_empty() {
        return Err(CommandError::invalid_argument(
            "execution_condition_invalid",
            format!("{what} must not be empty"),
        ));
    }
    Ok(())
}

impl ExecutionCondition {
    pub fn kind(&self) -> ExecutionKind {
        match self {
            ExecutionCondition::Request(_) => ExecutionKind::Request,
            ExecutionCondition::Response(_) => ExecutionKind::Response,
            ExecutionCondition::Function(_) => ExecutionKind::Function,
            ExecutionCondition::Event(_) => ExecutionKind::Event,
        }
    }

    /// Aggregate ID of the execution bound to this condition.
    pub fn id(&self) -> String {
        let kind = self.kind();
        match self {
            ExecutionCondition::Request(api) | ExecutionCondition::Response(api) => match api {
                ApiCondition::Method(name) | ApiCondition::Service(name) => {
                    format!("{kind}/{name}")
                }
                ApiCondition::All => kind.to_string(),
            },
            ExecutionCondition::Function(name) => format!("{kind}/{name}"),
            ExecutionCondition::Event(event) => match event {
                EventCondition::Event(name) => format!("{kind}/{name}"),
                EventCondition::Group(group) => format!("{kind}/{group}.*"),
                EventCondition::All => kind.to_string(),
            },
        }
    }

    /// Shape checks, no I/O.
    pub fn validate(&self) -> Result<(), CommandError> {
        match self {
            ExecutionCondition::Request(api) | ExecutionCondition::Response(api) => match api {
                ApiCondition::Method(method) => require_name(method, "method"),
                ApiCondition::Service(service) => require_name(service, "service"),
                ApiCondition::All => Ok(()),
            },
            ExecutionCondition::Function(name) => require_name(name, "function"),
            ExecutionCondition::Event(event) => match event {
                EventCondition::Event(name) => require_name(name, "event"),
                EventCondition::Group(group) => require_name(group, "event group"),
                EventCondition::All => Ok(()),
            },
        }
    }

    fn check_catalog(&self, catalog: &dyn ExecutionCatalog) -> Result<(), CommandError> {
        let (known, what) = match self {
            ExecutionCondition::Request(api) | ExecutionCondition::Response(api) => match api {
                ApiCondition::Method(method) => (catalog.method_exists(method), method),
                ApiCondition::Service(service) => (catalog.service_exists(service), service),
                ApiCondition::All => return Ok(()),
            },
            ExecutionCondition::Function(name) => (catalog.function_exists(name), name),
            ExecutionCondition::Event(event) => match event {
                EventCondition::Event(name) => (catalog.event_exists(name), name),
                EventCondition::Group(group) => (catalog.event_group_exists(group), group),
                EventCondition::All => return Ok(()),
            },
        };
        if !known {
            return Err(CommandError::not_found(
                "execution_condition_not_found",
                format!("{} {what} does not exist", self.kind()),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Catalog
// =============================================================================

/// Known methods, services, functions and events that conditions may name.
pub trait ExecutionCatalog: Send + Sync {
    fn method_exists(&self, method: &str) -> bool;

    fn service_exists(&self, service: &str) -> bool;

    fn function_exists(&self, function: &str) -> bool;

    fn event_exists(&self, event: &str) -> bool;

    fn event_group_exists(&self, group: &str) -> bool;
}

/// Accepts every condition.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllCatalog;

impl ExecutionCatalog for AcceptAllCatalog {
    fn method_exists(&self, _method: &str) -> bool {
        true
    }

    fn service_exists(&self, _service: &str) -> bool {
        true
    }

    fn function_exists(&self, _function: &str) -> bool {
        true
    }

    fn event_exists(&self, _event: &str) -> bool {
        true
    }

    fn event_group_exists(&self, _group: &str) -> bool {
        true
    }
}

/// Fixed catalog. A group exists if any known event type belongs to it.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    methods: HashSet<String>,
    services: HashSet<String>,
    functions: HashSet<String>,
    events: HashSet<String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.methods.insert(method.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.services.insert(service.into());
        self
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.functions.insert(function.into());
        self
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.events.insert(event.into());
        self
    }
}

impl ExecutionCatalog for StaticCatalog {
    fn method_exists(&self, method: &str) -> bool {
        self.methods.contains(method)
    }

    fn service_exists(&self, service: &str) -> bool {
        self.services.contains(service)
    }

    fn function_exists(&self, function: &str) -> bool {
        self.functions.contains(function)
    }

    fn event_exists(&self, event: &str) -> bool {
        self.events.contains(event)
    }

    fn event_group_exists(&self, group: &str) -> bool {
        let prefix = format!("{group}.");
        self.events.iter().any(|event| event.starts_with(&prefix))
    }
}

// =============================================================================
// Include resolution
// =============================================================================

/// Loads include lists from the log, scoped to the context's owner.
struct LogIncludeResolver<'a> {
    log: &'a dyn EventLog,
    ctx: &'a CommandContext,
}

#[async_trait]
impl IncludeResolver for LogIncludeResolver<'_> {
    async fn includes(&self, id: &str) -> Result<Vec<String>, CommandError> {
        let mut model = ExecutionWriteModel::new(
            self.ctx.instance_id,
            id,
            self.ctx.resource_owner.clone(),
        );
        load(self.log, self.ctx, &mut model).await?;
        Ok(model.includes())
    }
}

// =============================================================================
// Commands
// =============================================================================

fn validate_targets(kind: ExecutionKind, targets: &[ExecutionTarget]) -> Result<(), CommandError> {
    let mut seen = HashSet::new();
    for target in targets {
        if target.target.trim().is_empty() {
            return Err(CommandError::invalid_argument(
                "execution_target_invalid",
                "execution target must not be empty",
            ));
        }
        if !seen.insert((target.kind, target.target.as_str())) {
            return Err(CommandError::invalid_argument(
                "execution_target_duplicate",
                format!("{} is listed more than once", target.target),
            ));
        }
        if target.kind == ExecutionTargetKind::Include
            && ExecutionKind::of_id(&target.target) != Some(kind)
        {
            return Err(CommandError::invalid_argument(
                "execution_include_kind_mismatch",
                format!("{} is not a {kind} execution", target.target),
            ));
        }
    }
    Ok(())
}

impl Commands {
    /// Replaces the target list of the execution bound to `condition`.
    ///
    /// An empty list removes all targets. Setting the current list again
    /// appends nothing and returns the current details.
    #[instrument(
        skip(self, ctx, targets),
        fields(instance_id = %ctx.instance_id, execution_id = %condition.id(), targets = targets.len())
    )]
    pub async fn set_execution(
        &self,
        ctx: &CommandContext,
        condition: ExecutionCondition,
        targets: Vec<ExecutionTarget>,
    ) -> Result<ObjectDetails, CommandError> {
        if ctx.resource_owner.is_empty() {
            return Err(CommandError::invalid_argument(
                "resource_owner_missing",
                "resource owner is required",
            ));
        }
        condition.validate()?;
        let kind = condition.kind();
        validate_targets(kind, &targets)?;

        let execution_id = condition.id();
        self.permissions
            .check(ctx, EXECUTION_WRITE, &execution_id)
            .await?;
        condition.check_catalog(self.catalog.as_ref())?;

        let (includes, target_ids): (Vec<_>, Vec<_>) =
            targets.iter().partition(|target| target.is_include());
        self.require_existing(
            ctx,
            ExistenceModel::targets(
                ctx.instance_id,
                ctx.resource_owner.clone(),
                target_ids.iter().map(|t| t.target.clone()),
            ),
            "execution_target_not_found",
            "target",
        )
        .await?;
        let include_ids: Vec<String> = includes.iter().map(|t| t.target.clone()).collect();
        self.require_existing(
            ctx,
            ExistenceModel::executions(
                ctx.instance_id,
                ctx.resource_owner.clone(),
                include_ids.iter().cloned(),
            ),
            "execution_include_not_found",
            "execution",
        )
        .await?;

        let mut model = ExecutionWriteModel::new(
            ctx.instance_id,
            execution_id.clone(),
            ctx.resource_owner.clone(),
        );
        load(self.event_log.as_ref(), ctx, &mut model).await?;

        let resolver = LogIncludeResolver {
            log: self.event_log.as_ref(),
            ctx,
        };
        let mut cache = IncludeCache::new();
        check_for_include_cycles(
            &execution_id,
            &include_ids,
            &resolver,
            &mut cache,
            self.max_include_depth,
        )
        .await?;

        if model.targets_equal(&targets) {
            debug!("Execution targets unchanged");
            return Ok(model.base().details());
        }

        let event = AppendEvent::new(
            AggregateType::Execution,
            execution_id.as_str(),
            ctx.resource_owner.as_str(),
            event_types::EXECUTION_SET,
            &ExecutionSetPayload { targets },
        )?;
        self.push_and_reduce(ctx, &mut model, vec![event]).await?;

        info!(execution_id = %execution_id, "Execution set");
        Ok(model.base().details())
    }

    /// Removes the execution bound to `condition`.
    #[instrument(
        skip(self, ctx),
        fields(instance_id = %ctx.instance_id, execution_id = %condition.id())
    )]
    pub async fn remove_execution(
        &self,
        ctx: &CommandContext,
        condition: ExecutionCondition,
    ) -> Result<ObjectDetails, CommandError> {
        if ctx.resource_owner.is_empty() {
            return Err(CommandError::invalid_argument(
                "resource_owner_missing",
                "resource owner is required",
            ));
        }
        condition.validate()?;

        let execution_id = condition.id();
        self.permissions
            .check(ctx, EXECUTION_WRITE, &execution_id)
            .await?;

        let mut model = ExecutionWriteModel::new(
            ctx.instance_id,
            execution_id.clone(),
            ctx.resource_owner.clone(),
        );
        load(self.event_log.as_ref(), ctx, &mut model).await?;
        if !model.exists() {
            return Err(CommandError::not_found(
                "execution_not_found",
                format!("execution {execution_id} not found"),
            ));
        }

        let event = AppendEvent::new(
            AggregateType::Execution,
            execution_id.as_str(),
            ctx.resource_owner.as_str(),
            event_types::EXECUTION_REMOVED,
            &ExecutionRemovedPayload {},
        )?;
        self.push_and_reduce(ctx, &mut model, vec![event]).await?;

        info!(execution_id = %execution_id, "Execution removed");
        Ok(model.base().details())
    }

    /// Fails with NotFound naming the first missing ID.
    async fn require_existing(
        &self,
        ctx: &CommandContext,
        mut model: ExistenceModel,
        code: &'static str,
        what: &str,
    ) -> Result<(), CommandError> {
        if model.requested().is_empty() {
            return Ok(());
        }
        load(self.event_log.as_ref(), ctx, &mut model).await?;
        if let Some(missing) = model.missing().first() {
            return Err(CommandError::not_found(
                code,
                format!("{what} {missing} not found"),
            ));
        }
        Ok(())
    }
}
