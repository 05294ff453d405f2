use thiserror::Error;

use crate::domain::types::CaptureStatus;

/// Rule violations detected before anything touches the ledger or the store.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Caller-supplied input was rejected; the message is safe to show them.
    #[error("invalid capture request: {message}")]
    Validation { message: String },
    #[error("capture record invariant broken: {message}")]
    Invariant { message: String },
    #[error("capture cannot move from {} to {}", from.as_str(), to.as_str())]
    IllegalTransition {
        from: CaptureStatus,
        to: CaptureStatus,
    },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant {
            message: message.into(),
        }
    }
}
