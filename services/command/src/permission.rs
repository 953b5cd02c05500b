//! Permission checks for commands.
//!
//! Commands ask a [`PermissionChecker`] before touching the log. The
//! role-based checker maps actors to roles within one instance; the system
//! actor is always allowed.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use iam_id::InstanceId;
use tracing::debug;

use crate::context::CommandContext;
use crate::error::CommandError;

pub const TARGET_WRITE: &str = "action.target.write";
pub const EXECUTION_WRITE: &str = "action.execution.write";
pub const WEB_KEY_WRITE: &str = "iam.web_key.write";

#[async_trait]
pub trait PermissionChecker: Send + Sync {
    /// Fails with `PermissionDenied` unless the context's actor holds
    /// `permission` on `resource_id`.
    async fn check(
        &self,
        ctx: &CommandContext,
        permission: &str,
        resource_id: &str,
    ) -> Result<(), CommandError>;
}

/// Instance-level roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    IamOwner,
    IamAdmin,
    /// Read-only; holds no write permission.
    IamViewer,
}

impl Role {
    pub fn grants(&self, permission: &str) -> bool {
        match self {
            Role::IamOwner => true,
            Role::IamAdmin => matches!(permission, TARGET_WRITE | EXECUTION_WRITE),
            Role::IamViewer => false,
        }
    }
}

/// Checks permissions against roles granted per instance and actor ID.
///
/// A role granted in one instance means nothing in another.
#[derive(Debug, Default)]
pub struct RolePermissionChecker {
    grants: RwLock<HashMap<(InstanceId, String), Vec<Role>>>,
}

impl RolePermissionChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grant(
        self,
        instance_id: InstanceId,
        actor_id: impl Into<String>,
        role: Role,
    ) -> Self {
        self.grant(instance_id, actor_id, role);
        self
    }

    pub fn grant(&self, instance_id: InstanceId, actor_id: impl Into<String>, role: Role) {
        let mut grants = self
            .grants
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        grants
            .entry((instance_id, actor_id.into()))
            .or_default()
            .push(role);
    }
}

#[async_trait]
impl PermissionChecker for RolePermissionChecker {
    async fn check(
        &self,
        ctx: &CommandContext,
        permission: &str,
        resource_id: &str,
    ) -> Result<(), CommandError> {
        if ctx.is_system() {
            return Ok(());
        }

        let allowed = {
            let grants = self
                .grants
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            grants
                .get(&(ctx.instance_id, ctx.actor_id.clone()))
                .is_some_and(|roles| roles.iter().any(|role| role.grants(permission)))
        };

        if !allowed {
            debug!(
                instance_id = %ctx.instance_id,
                actor_id = %ctx.actor_id,
                permission,
                resource_id,
                "Permission denied"
            );
            return Err(CommandError::permission_denied(
                "permission_denied",
                format!("missing permission {permission}"),
            ));
        }
        Ok(())
    }
}
