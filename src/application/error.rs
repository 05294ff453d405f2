use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{captures::CaptureError, pipeline::PipelineError, repos::RepoError},
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Diagnostic chain attached to error responses for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("resource not found")]
    NotFound,
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Capture(CaptureError::NotFound)
            | AppError::Capture(CaptureError::Pipeline(PipelineError::NotFound(_)))
            | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Domain(DomainError::Validation { .. })
            | AppError::Capture(CaptureError::Domain(DomainError::Validation { .. }))
            | AppError::Capture(CaptureError::Pagination(_))
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Capture(CaptureError::NotCaptured { .. })
            | AppError::Capture(CaptureError::Pipeline(PipelineError::Busy(_))) => {
                StatusCode::CONFLICT
            }
            AppError::Capture(CaptureError::Repo(RepoError::Timeout))
            | AppError::Capture(CaptureError::Pipeline(PipelineError::Ledger(_)))
            | AppError::Capture(CaptureError::WaitTimeout { .. })
            | AppError::Infra(InfraError::Database { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Capture(_)
            | AppError::Infra(_)
            | AppError::Domain(_)
            | AppError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn presentation_message(&self) -> &'static str {
        match self.status_code() {
            StatusCode::NOT_FOUND => "Resource not found",
            StatusCode::BAD_REQUEST => "Request could not be processed",
            StatusCode::CONFLICT => "Capture is not in a usable state",
            StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable",
            _ => match self {
                AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
                AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
                AppError::Infra(InfraError::Migration { .. }) => "Ledger schema is not current",
                AppError::Infra(
                    InfraError::Io(_) | InfraError::Bind { .. } | InfraError::StoreRoot { .. },
                ) => "Storage or network I/O failed",
                _ => "Unexpected error occurred",
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.presentation_message();
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, message).into_response();
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_errors_map_to_distinct_statuses() {
        assert_eq!(
            AppError::from(CaptureError::NotFound).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(CaptureError::Domain(DomainError::validation("bad url"))).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(CaptureError::Repo(RepoError::Timeout)).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(CaptureError::NotCaptured {
                status: crate::domain::types::CaptureStatus::Rendering
            })
            .status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn report_collects_error_chain() {
        let err = AppError::from(CaptureError::Repo(RepoError::Persistence("disk full".into())));
        let report = ErrorReport::from_error("test", StatusCode::INTERNAL_SERVER_ERROR, &err);
        assert_eq!(report.messages[0], "persistence error: disk full");
        assert_eq!(
            AppError::from(CaptureError::Repo(RepoError::Persistence("x".into())))
                .presentation_message(),
            "Unexpected error occurred"
        );
    }
}
