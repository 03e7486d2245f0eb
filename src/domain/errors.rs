use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Entity not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Storage backend error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl DomainError {
    /// Whether the failure comes from transient backend unavailability and the
    /// caller may simply try again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            DomainError::Timeout(_) => true,
            DomainError::Backend(err) => match err {
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(db_err) => {
                    let message = db_err.message();
                    message.contains("locked") || message.contains("busy")
                }
                _ => false,
            },
            _ => false,
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_retryable() {
        assert!(DomainError::Backend(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(DomainError::Timeout("dequeue".to_string()).is_retryable());
    }

    #[test]
    fn test_logical_errors_are_not_retryable() {
        assert!(!DomainError::NotFound("note-1".to_string()).is_retryable());
        assert!(!DomainError::Backend(sqlx::Error::RowNotFound).is_retryable());
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!DomainError::Serialization(parse_err).is_retryable());
    }
}
