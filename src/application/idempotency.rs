//! Admission of capture requests, one effective execution per dedupe key.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::timeout;
use tracing::info;

use crate::application::repos::{Admission, CaptureLedger, RepoError};
use crate::domain::{
    dedupe::{BucketWidth, DedupeInput, DedupeKey, normalize_target_url},
    entities::{CaptureRecord, NewCapture},
    error::DomainError,
    retention::RetentionPolicy,
    types::ArtifactFormat,
};

/// Longest accepted schedule back-reference.
pub const MAX_SCHEDULE_ID_LEN: usize = 128;

/// Capture request as delivered by the routing layer.
#[derive(Debug, Clone, Default)]
pub struct CaptureRequest {
    pub owner_id: String,
    pub target_url: String,
    /// `pdf` when absent.
    pub format: Option<String>,
    pub request_id: Option<String>,
    pub schedule_id: Option<String>,
    pub retention_tier: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error(transparent)]
    Ledger(#[from] RepoError),
}

pub struct IdempotencyCoordinator {
    ledger: Arc<dyn CaptureLedger>,
    bucket: BucketWidth,
    retention: RetentionPolicy,
    stale_after: time::Duration,
    io_timeout: Duration,
}

impl IdempotencyCoordinator {
    pub fn new(
        ledger: Arc<dyn CaptureLedger>,
        bucket: BucketWidth,
        retention: RetentionPolicy,
        stale_after: time::Duration,
        io_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            bucket,
            retention,
            stale_after,
            io_timeout,
        }
    }

    pub fn bucket(&self) -> BucketWidth {
        self.bucket
    }

    /// Validate the request and build the `Queued` candidate for it.
    pub fn prepare(
        &self,
        request: &CaptureRequest,
        now: OffsetDateTime,
    ) -> Result<CaptureRecord, DomainError> {
        let owner_id = request.owner_id.trim();
        let format = match request.format.as_deref().map(str::trim) {
            None | Some("") => ArtifactFormat::Pdf,
            Some(raw) => ArtifactFormat::try_from(raw).map_err(|()| {
                DomainError::validation(format!("unsupported format `{raw}`"))
            })?,
        };
        let target = normalize_target_url(&request.target_url)?;
        let (tier, _) = self.retention.resolve(request.retention_tier.as_deref())?;
        let schedule_id = request
            .schedule_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if schedule_id.is_some_and(|value| value.len() > MAX_SCHEDULE_ID_LEN) {
            return Err(DomainError::validation(format!(
                "schedule id exceeds {MAX_SCHEDULE_ID_LEN} characters"
            )));
        }

        let key = DedupeKey::derive(
            DedupeInput {
                owner_id,
                format,
                target: &target,
                request_id: request.request_id.as_deref(),
                requested_at: now,
            },
            self.bucket,
        )?;

        Ok(CaptureRecord::queued(
            NewCapture {
                owner_id: owner_id.to_string(),
                schedule_id: schedule_id.map(str::to_string),
                target_url: target.to_string(),
                format,
                dedupe_key: key.as_str().to_string(),
                retention_tier: tier.to_string(),
            },
            now,
            self.stale_after,
        ))
    }

    /// Admit a request: either the caller gets a new `Queued` record to
    /// execute, or the record already holding the key.
    pub async fn admit(&self, request: &CaptureRequest) -> Result<Admission, AdmissionError> {
        let candidate = self.prepare(request, OffsetDateTime::now_utc())?;
        let admission = timeout(self.io_timeout, self.ledger.admit(candidate))
            .await
            .map_err(|_| RepoError::Timeout)??;

        let record = admission.record();
        info!(
            target = "application::idempotency::admit",
            capture_id = %record.id,
            dedupe_key = %record.dedupe_key,
            admitted = admission.is_new(),
            status = record.status.as_str(),
            "capture request admitted"
        );
        Ok(admission)
    }
}
