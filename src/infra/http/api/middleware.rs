use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::error::ApiError;
use super::state::OwnerId;

pub const OWNER_HEADER: &str = "x-owner-id";

/// Longest owner identifier accepted from the gateway.
const MAX_OWNER_LEN: usize = 128;

/// Attach the gateway-asserted tenant to the request, rejecting requests without one.
pub async fn require_owner(mut request: Request<Body>, next: Next) -> Response {
    let owner = request
        .headers()
        .get(OWNER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_OWNER_LEN)
        .map(str::to_string);

    let Some(owner) = owner else {
        return ApiError::unauthorized().into_response();
    };

    request.extensions_mut().insert(OwnerId(owner));
    next.run(request).await
}
