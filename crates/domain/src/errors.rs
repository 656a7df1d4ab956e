use thiserror::Error;

/// 领域错误类型
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid argument `{field}`: {reason}")]
    InvalidArgument { field: String, reason: String },
    #[error("identity not found")]
    IdentityNotFound,
    #[error("subscription not found")]
    SubscriptionNotFound,
    #[error("insufficient permissions")]
    InsufficientPermissions,
    #[error("operation not allowed")]
    OperationNotAllowed,
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        DomainError::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
