pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use state::{ApiState, OwnerId};

use axum::{Router, middleware as axum_middleware, routing::get};

use crate::infra::http::middleware::{log_responses, set_request_context};
use crate::infra::links::OBJECTS_ROUTE_PREFIX;

/// Capture API plus the signed object route and health probe.
pub fn build_api_router(state: ApiState) -> Router {
    let owned = Router::new()
        .route(
            "/v1/captures",
            get(handlers::list_captures).post(handlers::trigger_capture),
        )
        .route("/v1/captures/{id}", get(handlers::get_capture))
        .route("/v1/captures/{id}/verify", get(handlers::verify_capture))
        .route(
            "/v1/captures/{id}/download",
            get(handlers::download_capture),
        )
        .route(
            "/v1/digests/{digest}/captures",
            get(handlers::captures_by_digest),
        )
        .route_layer(axum_middleware::from_fn(middleware::require_owner));

    let open = Router::new()
        .route(
            &format!("{OBJECTS_ROUTE_PREFIX}/{{*key}}"),
            get(handlers::get_object),
        )
        .route("/health", get(handlers::health));

    owned
        .merge(open)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
