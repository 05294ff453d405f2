//! Signed object downloads

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use time::OffsetDateTime;
use tracing::warn;

use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::SignedObjectQuery;
use crate::infra::http::api::state::ApiState;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
pub const DIGEST_HEADER: &str = "x-content-digest";

/// Serve stored bytes for a link issued by `resolve_download_location`.
///
/// The signature is the only credential; no owner header is required.
pub async fn get_object(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Query(query): Query<SignedObjectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .signer
        .verify(&key, query.expires, &query.signature, OffsetDateTime::now_utc())?;

    let bytes = state.store.get(&key).await?;
    let metadata = match state.store.head(&key).await {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!(
                target = "infra::http::api::objects",
                key = %key,
                error = %err,
                "serving object without metadata"
            );
            None
        }
    };

    let content_type = metadata
        .as_ref()
        .map(|meta| meta.content_type.clone())
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());
    let digest = metadata
        .map(|meta| meta.digest.as_str().to_string())
        .unwrap_or_default();

    Ok((
        [
            (header::CONTENT_TYPE.as_str(), content_type),
            (header::CACHE_CONTROL.as_str(), "private, no-store".to_string()),
            (DIGEST_HEADER, digest),
        ],
        bytes,
    ))
}
