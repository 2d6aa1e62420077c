use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoachError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("analysis error: {0}")]
    Analysis(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoachError {
    /// Stable machine-readable name of the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Database(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidState(_) => "invalid_state",
            Self::Validation(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::Analysis(_) => "analysis_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Only a lost activation race is worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

pub type CoachResult<T> = Result<T, CoachError>;
