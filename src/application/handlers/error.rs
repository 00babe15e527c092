use thiserror::Error;

use crate::application::ports::StoreError;
use crate::shared::ErrorCode;

/// Failure of an inbound action, answered with a CallError.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Action not implemented: {0}")]
    NotImplemented(String),
    #[error("Invalid payload: {0}")]
    FormationViolation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotImplemented(_) => ErrorCode::NotImplemented,
            Self::FormationViolation(_) => ErrorCode::FormationViolation,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}
