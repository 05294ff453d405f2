use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use evidentia_api_types::HealthResponse;

use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::state::ApiState;

pub async fn health(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    state.captures.ping(state.health_timeout).await?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}
