use domain::{ConnectionId, DomainError, MessageId, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("infrastructure error: {message}")]
    Infrastructure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error("message {0} not found")]
    MessageNotFound(MessageId),
    #[error("only the author may modify message {0}")]
    NotMessageAuthor(MessageId),
    #[error("message {0} has been deleted")]
    MessageDeleted(MessageId),
    #[error("message {0} was modified concurrently, please retry")]
    ConcurrentModification(MessageId),
    #[error("connection {0} is not registered")]
    ConnectionNotFound(ConnectionId),
    #[error("event identity does not match the connection identity")]
    IdentityMismatch,
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure {
            message: message.into(),
            source: None,
        }
    }

    pub fn infrastructure_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ApplicationError::Infrastructure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// `error` 事件中使用的稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Domain(DomainError::ValidationError { .. }) => "INVALID_ARGUMENT",
            ApplicationError::Domain(DomainError::MessageDeleted) => "MESSAGE_DELETED",
            ApplicationError::Repository(RepositoryError::NotFound) => "NOT_FOUND",
            ApplicationError::Repository(_) => "INFRASTRUCTURE_ERROR",
            ApplicationError::Infrastructure { .. } => "INFRASTRUCTURE_ERROR",
            ApplicationError::MessageNotFound(_) => "NOT_FOUND",
            ApplicationError::NotMessageAuthor(_) => "FORBIDDEN",
            ApplicationError::MessageDeleted(_) => "MESSAGE_DELETED",
            ApplicationError::ConcurrentModification(_) => "CONFLICT",
            ApplicationError::ConnectionNotFound(_) => "NOT_FOUND",
            ApplicationError::IdentityMismatch => "IDENTITY_MISMATCH",
        }
    }

    /// 是否为存储/注册表不可用这类瞬时故障
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApplicationError::Infrastructure { .. }
                | ApplicationError::Repository(RepositoryError::Storage { .. })
        )
    }
}
