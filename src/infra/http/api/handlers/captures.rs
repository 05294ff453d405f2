//! Capture handlers

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use evidentia_api_types::{CaptureListResponse, TriggerCaptureRequest};
use uuid::Uuid;

use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::{
    CaptureListQuery, capture_request, capture_to_api, link_to_api, page_to_api, trigger_to_api,
    verify_to_api,
};
use crate::infra::http::api::state::{ApiState, OwnerId};

/// `202 Accepted` for newly admitted work, `200 OK` when an equivalent capture exists.
pub async fn trigger_capture(
    State(state): State<ApiState>,
    Extension(owner): Extension<OwnerId>,
    Json(body): Json<TriggerCaptureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .captures
        .trigger(capture_request(owner.as_str(), body))
        .await?;
    let status = if outcome.admitted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(trigger_to_api(outcome))))
}

pub async fn list_captures(
    State(state): State<ApiState>,
    Extension(owner): Extension<OwnerId>,
    Query(query): Query<CaptureListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let range = query.time_range()?;
    let page = state
        .captures
        .list_by_owner(owner.as_str(), range, query.limit, query.cursor.as_deref())
        .await?;
    Ok(Json(page_to_api(page)))
}

pub async fn get_capture(
    State(state): State<ApiState>,
    Extension(owner): Extension<OwnerId>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.captures.get(owner.as_str(), id).await?;
    Ok(Json(capture_to_api(record)))
}

pub async fn verify_capture(
    State(state): State<ApiState>,
    Extension(owner): Extension<OwnerId>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.captures.verify(owner.as_str(), id).await?;
    Ok(Json(verify_to_api(&report)))
}

pub async fn download_capture(
    State(state): State<ApiState>,
    Extension(owner): Extension<OwnerId>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let link = state
        .captures
        .resolve_download_location(owner.as_str(), id)
        .await?;
    Ok(Json(link_to_api(link)))
}

pub async fn captures_by_digest(
    State(state): State<ApiState>,
    Extension(owner): Extension<OwnerId>,
    Path(digest): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state.captures.find_by_digest(owner.as_str(), &digest).await?;
    Ok(Json(CaptureListResponse {
        items: records.into_iter().map(capture_to_api).collect(),
        next_cursor: None,
    }))
}
