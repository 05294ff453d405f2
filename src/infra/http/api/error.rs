use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use evidentia_api_types::{ApiErrorBody, ApiErrorMessage};

use crate::application::captures::CaptureError;
use crate::application::error::ErrorReport;
use crate::application::pipeline::PipelineError;
use crate::application::repos::RepoError;
use crate::application::storage::ObjectStoreError;
use crate::domain::error::DomainError;
use crate::infra::links::LinkError;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_FOUND: &str = "not_found";
    pub const INVALID_CURSOR: &str = "invalid_cursor";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const NOT_CAPTURED: &str = "not_captured";
    pub const BUSY: &str = "capture_busy";
    pub const LINK_EXPIRED: &str = "link_expired";
    pub const OBJECT_MISSING: &str = "object_missing";
    pub const INTEGRITY: &str = "integrity_error";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const REPO: &str = "repo_error";
    pub const STORE: &str = "store_error";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    /// Diagnostic kept out of the body and handed to the logging middleware.
    detail: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Owner identity required",
            Some("send the tenant in the x-owner-id header".to_string()),
        )
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    fn internal(code: &'static str, detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            code,
            "Unexpected error occurred",
            None,
        )
        .with_detail(detail)
    }

    fn unavailable(code: &'static str, detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            code,
            "Service temporarily unavailable",
            None,
        )
        .with_detail(detail)
    }
}

impl From<CaptureError> for ApiError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::NotFound => ApiError::not_found("Capture not found"),
            CaptureError::Domain(DomainError::Validation { message }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "Request could not be processed",
                Some(message),
            ),
            CaptureError::Domain(err) => ApiError::internal(codes::INTERNAL, err.to_string()),
            CaptureError::NotCaptured { status } => ApiError::new(
                StatusCode::CONFLICT,
                codes::NOT_CAPTURED,
                "Capture has not succeeded",
                Some(format!("capture is {}", status.as_str())),
            ),
            CaptureError::Pagination(err) => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_CURSOR,
                "Invalid cursor",
                Some(err.to_string()),
            ),
            CaptureError::Repo(err) => ApiError::from(err),
            CaptureError::Store(err) => ApiError::from(err),
            CaptureError::Pipeline(PipelineError::Busy(err)) => ApiError::new(
                StatusCode::CONFLICT,
                codes::BUSY,
                "Capture is being processed",
                Some(err.to_string()),
            ),
            CaptureError::Pipeline(PipelineError::NotFound(_)) => {
                ApiError::not_found("Capture not found")
            }
            CaptureError::Pipeline(err) => {
                ApiError::unavailable(codes::UNAVAILABLE, err.to_string())
            }
            err @ CaptureError::WaitTimeout { .. } => {
                ApiError::unavailable(codes::UNAVAILABLE, err.to_string())
            }
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => ApiError::not_found("Capture not found"),
            RepoError::Pagination(err) => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_CURSOR,
                "Invalid cursor",
                Some(err.to_string()),
            ),
            RepoError::InvalidInput { message } => ApiError::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "Request could not be processed",
                Some(message),
            ),
            RepoError::Timeout => ApiError::unavailable(codes::DB_TIMEOUT, "database timeout"),
            RepoError::Integrity { message } => ApiError::internal(codes::INTEGRITY, message),
            err @ (RepoError::Duplicate { .. } | RepoError::Persistence(_)) => {
                ApiError::internal(codes::REPO, err.to_string())
            }
        }
    }
}

impl From<ObjectStoreError> for ApiError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotFound { .. } => ApiError::new(
                StatusCode::NOT_FOUND,
                codes::OBJECT_MISSING,
                "Stored object not found",
                None,
            ),
            ObjectStoreError::InvalidKey { .. } => ApiError::not_found("Stored object not found"),
            err if err.is_transient() => ApiError::unavailable(codes::STORE, err.to_string()),
            err => ApiError::internal(codes::STORE, err.to_string()),
        }
    }
}

impl From<LinkError> for ApiError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Expired => ApiError::new(
                StatusCode::GONE,
                codes::LINK_EXPIRED,
                "Download link expired",
                None,
            ),
            LinkError::BadSignature => ApiError::new(
                StatusCode::FORBIDDEN,
                codes::FORBIDDEN,
                "Download link is not valid",
                None,
            ),
            LinkError::WeakSecret => ApiError::internal(codes::INTERNAL, err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let diagnostic = self
            .detail
            .clone()
            .or_else(|| self.hint.clone())
            .unwrap_or_else(|| self.message.to_string());
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message(
            "infra::http::api",
            self.status,
            format!("{}: {diagnostic}", self.code),
        )
        .attach(&mut response);
        response
    }
}
