//! Per-command request context.
//!
//! Carries tenancy, audit identity, and the cancellation signal and
//! deadline that every event log read and append honors.

use std::future::Future;
use std::time::Duration;

use iam_events::ActorType;
use iam_id::{InstanceId, RequestId};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::eventstore::LogError;

#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Tenant every read and append is scoped to.
    pub instance_id: InstanceId,
    /// Owner of the resources written by this command.
    pub resource_owner: String,
    pub actor_type: ActorType,
    pub actor_id: String,
    pub request_id: RequestId,
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl CommandContext {
    /// Context for the system actor, owning resources at instance level.
    pub fn system(instance_id: InstanceId) -> Self {
        Self::for_actor(instance_id, ActorType::System, "system")
    }

    pub fn for_actor(
        instance_id: InstanceId,
        actor_type: ActorType,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            instance_id,
            resource_owner: instance_id.to_string(),
            actor_type,
            actor_id: actor_id.into(),
            request_id: RequestId::new(),
            deadline: None,
            cancel: None,
        }
    }

    pub fn with_resource_owner(mut self, owner: impl Into<String>) -> Self {
        self.resource_owner = owner.into();
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Cancels the command once `true` is sent on the channel.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn is_system(&self) -> bool {
        self.actor_type == ActorType::System
    }

    /// Fails if the command was already canceled or its deadline passed.
    pub fn ensure_active(&self) -> Result<(), LogError> {
        if let Some(cancel) = &self.cancel {
            if *cancel.borrow() {
                return Err(LogError::Canceled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(LogError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Runs `fut` until it completes, the context is canceled, or the
    /// deadline passes, whichever happens first.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, LogError>
    where
        F: Future<Output = Result<T, LogError>>,
    {
        self.ensure_active()?;

        let canceled = async {
            match self.cancel.clone() {
                Some(mut cancel) => {
                    let sender_dropped = cancel.wait_for(|canceled| *canceled).await.is_err();
                    // A dropped sender can never cancel.
                    if sender_dropped {
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = fut => result,
            _ = canceled => Err(LogError::Canceled),
            _ = expired => Err(LogError::DeadlineExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_passes_through_result() {
        let ctx = CommandContext::system(InstanceId::new());
        let result = ctx.guard(async { Ok::<_, LogError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_guard_returns_canceled() {
        let (tx, rx) = watch::channel(false);
        let ctx = CommandContext::system(InstanceId::new()).with_cancellation(rx);

        let pending = ctx.guard(async {
            std::future::pending::<()>().await;
            Ok::<_, LogError>(())
        });
        tx.send(true).unwrap();

        assert!(matches!(pending.await, Err(LogError::Canceled)));
    }

    #[tokio::test]
    async fn test_ensure_active_after_cancel() {
        let (tx, rx) = watch::channel(false);
        let ctx = CommandContext::system(InstanceId::new()).with_cancellation(rx);
        assert!(ctx.ensure_active().is_ok());
        tx.send(true).unwrap();
        assert!(matches!(ctx.ensure_active(), Err(LogError::Canceled)));
    }

    #[tokio::test]
    async fn test_guard_deadline_exceeded() {
        let ctx = CommandContext::system(InstanceId::new()).with_timeout(Duration::from_millis(50));
        let result = ctx
            .guard(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, LogError>(())
            })
            .await;
        assert!(matches!(result, Err(LogError::DeadlineExceeded)));
    }

    #[test]
    fn test_system_context_owns_instance() {
        let instance = InstanceId::new();
        let ctx = CommandContext::system(instance);
        assert!(ctx.is_system());
        assert_eq!(ctx.resource_owner, instance.to_string());
    }
}
