use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Terminal, user-visible errors of the authorization engine.
///
/// Business-rule failures are final for the request that triggered them;
/// nothing here is retried by the engine itself.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("card not found: {0}")]
    CardNotFound(String),
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("daily spending limit exceeded")]
    DailyLimitExceeded,
    #[error("monthly spending limit exceeded")]
    MonthlyLimitExceeded,
    #[error("reservation expired or already settled")]
    ReservationExpired,
    #[error("approval request not found: {0}")]
    ApprovalNotFound(Uuid),
    #[error("approval request has expired")]
    ApprovalExpired,
    #[error("approval request already {0}")]
    ApprovalAlreadyResolved(String),
    #[error("approver {0} is not authorized to resolve this request")]
    UnauthorizedApprover(String),
    #[error("account locked, retry in {remaining_secs}s")]
    AccountLocked { remaining_secs: i64 },
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("session not found")]
    SessionNotFound,
    #[error("session is not authenticated")]
    Unauthenticated,
    #[error("missing capability: {0}")]
    MissingCapability(String),
    #[error("internal error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
    /// Wraps an infrastructure failure that callers cannot act on.
    pub fn internal<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal(Box::new(source))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err)
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for EngineError {
    fn from(err: rocksdb::Error) -> Self {
        Self::internal(err)
    }
}
