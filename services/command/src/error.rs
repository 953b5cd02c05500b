//! Command error types.
//!
//! Every error carries a stable machine-readable code alongside its display
//! message. Event log failures keep their source for logging but only show a
//! public message.

use iam_events::EventError;
use iam_id::IdError;
use thiserror::Error;

use crate::crypto::CryptoError;
use crate::eventstore::LogError;

/// Coarse error category, for mapping onto API status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    PreconditionFailed,
    PermissionDenied,
    /// Optimistic concurrency rejection; the caller may retry the command.
    Conflict,
    Canceled,
    Internal,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{message}")]
    InvalidArgument { code: &'static str, message: String },

    #[error("{message}")]
    NotFound { code: &'static str, message: String },

    #[error("{message}")]
    AlreadyExists { code: &'static str, message: String },

    #[error("{message}")]
    PreconditionFailed { code: &'static str, message: String },

    #[error("{message}")]
    PermissionDenied { code: &'static str, message: String },

    #[error("{message}")]
    Internal {
        code: &'static str,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("{}", .0.public_message())]
    EventLog(#[from] LogError),
}

impl CommandError {
    pub fn invalid_argument(code: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn already_exists(code: &'static str, message: impl Into<String>) -> Self {
        Self::AlreadyExists {
            code,
            message: message.into(),
        }
    }

    pub fn precondition_failed(code: &'static str, message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            code,
            message: message.into(),
        }
    }

    pub fn permission_denied(code: &'static str, message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            code,
            message: message.into(),
        }
    }

    pub fn internal<E>(code: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            code,
            message: "internal error".to_string(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::Internal { .. } => ErrorKind::Internal,
            Self::EventLog(err) => match err {
                LogError::Conflict { .. } => ErrorKind::Conflict,
                LogError::Canceled | LogError::DeadlineExceeded => ErrorKind::Canceled,
                LogError::TenantMismatch { .. } => ErrorKind::PermissionDenied,
                LogError::Storage(_) | LogError::Database(_) | LogError::Event(_) => {
                    ErrorKind::Internal
                }
            },
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { code, .. }
            | Self::NotFound { code, .. }
            | Self::AlreadyExists { code, .. }
            | Self::PreconditionFailed { code, .. }
            | Self::PermissionDenied { code, .. }
            | Self::Internal { code, .. } => code,
            Self::EventLog(err) => match err {
                LogError::Conflict { .. } => "event_log_conflict",
                LogError::TenantMismatch { .. } => "instance_mismatch",
                LogError::Canceled => "canceled",
                LogError::DeadlineExceeded => "deadline_exceeded",
                LogError::Storage(_) | LogError::Database(_) | LogError::Event(_) => {
                    "event_log_internal"
                }
            },
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.kind() == ErrorKind::InvalidArgument
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_precondition_failed(&self) -> bool {
        self.kind() == ErrorKind::PreconditionFailed
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

/// Payload decode failures abort the command.
impl From<EventError> for CommandError {
    fn from(err: EventError) -> Self {
        Self::internal("event_decode", err)
    }
}

impl From<IdError> for CommandError {
    fn from(err: IdError) -> Self {
        Self::internal("id_generation", err)
    }
}

impl From<CryptoError> for CommandError {
    fn from(err: CryptoError) -> Self {
        Self::internal("crypto", err)
    }
}
