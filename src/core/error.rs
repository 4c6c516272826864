use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepoError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A write reached every connection but they disagree on the outcome.
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Duplicate unique key: {0}")]
    DuplicateUniqueKey(String),

    /// Misuse of a session flow; the message is surfaced verbatim.
    #[error("{0}")]
    State(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Transaction {0} not found")]
    TransactionNotFound(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    pub(crate) fn not_on_all_connections(detail: impl std::fmt::Display) -> Self {
        Self::Consistency(format!(
            "Operation not successful on all connections: {}",
            detail
        ))
    }

    pub(crate) fn pipe_closed() -> Self {
        Self::State("Pipe has been closed!".into())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
