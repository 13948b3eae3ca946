use ulid::Ulid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("business rule violated: {0}")]
    BusinessRule(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A lock could not be acquired within the configured wait.
    #[error("{0} is busy, retry later")]
    Busy(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn event_not_found(id: Ulid) -> Self {
        EngineError::NotFound {
            kind: "event",
            id: id.to_string(),
        }
    }

    pub fn reservation_not_found(id: impl ToString) -> Self {
        EngineError::NotFound {
            kind: "reservation",
            id: id.to_string(),
        }
    }

    pub fn user_not_found(id: impl ToString) -> Self {
        EngineError::NotFound {
            kind: "user",
            id: id.to_string(),
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::BusinessRule(_) => "business_rule",
            EngineError::Conflict(_) => "conflict",
            EngineError::Busy(_) => "busy",
            EngineError::Internal(_) => "internal",
            EngineError::WalError(_) => "wal",
        }
    }
}
