use thiserror::Error;

/// Failures of a [SessionStore](super::session_store::SessionStore). Only
/// [StoreError::ConstraintViolation] carries a message meant for the user, the rest is reported
/// generically with the original error kept for diagnostics.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no work session with id {0}")]
    NotFound(i64),

    #[error("constraint violated: {0}")]
    ConstraintViolation(String),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_unexpected(&self) -> bool {
        matches!(self, StoreError::Unexpected(_))
    }
}
