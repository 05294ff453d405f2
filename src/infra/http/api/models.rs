use evidentia_api_types::{
    CaptureFailureBody, CaptureListResponse, CaptureResponse, DownloadLinkResponse,
    TriggerCaptureRequest, TriggerCaptureResponse, VerifyResponse,
};
use serde::Deserialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::application::captures::TriggerOutcome;
use crate::application::idempotency::CaptureRequest;
use crate::application::pagination::CursorPage;
use crate::application::repos::TimeRange;
use crate::application::storage::DownloadLink;
use crate::application::verify::VerifyReport;
use crate::domain::entities::CaptureRecord;

use super::error::ApiError;

#[derive(Debug, Default, Deserialize)]
pub struct CaptureListQuery {
    /// Inclusive lower bound on `requested_at`, RFC 3339.
    pub from: Option<String>,
    /// Exclusive upper bound on `requested_at`, RFC 3339.
    pub to: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

impl CaptureListQuery {
    pub fn time_range(&self) -> Result<TimeRange, ApiError> {
        Ok(TimeRange::new(
            parse_instant("from", self.from.as_deref())?,
            parse_instant("to", self.to.as_deref())?,
        ))
    }
}

fn parse_instant(field: &str, raw: Option<&str>) -> Result<Option<OffsetDateTime>, ApiError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => OffsetDateTime::parse(value, &Rfc3339).map(Some).map_err(|err| {
            ApiError::bad_request(
                "invalid timestamp",
                Some(format!("`{field}` must be RFC 3339: {err}")),
            )
        }),
    }
}

pub fn capture_request(owner_id: &str, body: TriggerCaptureRequest) -> CaptureRequest {
    CaptureRequest {
        owner_id: owner_id.to_string(),
        target_url: body.target_url,
        format: body.format,
        request_id: body.request_id,
        schedule_id: body.schedule_id,
        retention_tier: body.retention_tier,
    }
}

pub fn capture_to_api(record: CaptureRecord) -> CaptureResponse {
    CaptureResponse {
        id: record.id,
        owner_id: record.owner_id,
        schedule_id: record.schedule_id,
        target_url: record.target_url,
        format: record.format.as_str().to_string(),
        dedupe_key: record.dedupe_key,
        object_key: record.object_key,
        digest: record.digest.map(|digest| digest.as_str().to_string()),
        status: record.status.as_str().to_string(),
        requested_at: record.requested_at,
        completed_at: record.completed_at,
        duration_ms: record.duration_ms,
        error: record.error.map(|failure| CaptureFailureBody {
            kind: failure.kind.as_str().to_string(),
            message: failure.message,
        }),
        attempts: record.attempts,
        retention_tier: record.retention_tier,
    }
}

pub fn trigger_to_api(outcome: TriggerOutcome) -> TriggerCaptureResponse {
    TriggerCaptureResponse {
        admitted: outcome.admitted,
        capture: capture_to_api(outcome.record),
    }
}

pub fn page_to_api(page: CursorPage<CaptureRecord>) -> CaptureListResponse {
    CaptureListResponse {
        items: page.items.into_iter().map(capture_to_api).collect(),
        next_cursor: page.next_cursor,
    }
}

pub fn verify_to_api(report: &VerifyReport) -> VerifyResponse {
    VerifyResponse {
        id: report.id,
        ok: report.ok(),
        digest_matches: report.digest_matches(),
        outcome: report.outcome.as_str().to_string(),
        recorded_digest: report.recorded_digest().map(|d| d.as_str().to_string()),
        computed_digest: report.computed_digest().map(|d| d.as_str().to_string()),
    }
}

pub fn link_to_api(link: DownloadLink) -> DownloadLinkResponse {
    DownloadLinkResponse {
        url: link.url,
        expires_at: link.expires_at,
    }
}

/// Query string carried by signed object links.
#[derive(Debug, Deserialize)]
pub struct SignedObjectQuery {
    pub expires: i64,
    pub signature: String,
}
