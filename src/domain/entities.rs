//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::domain::{
    digest::ContentDigest,
    error::DomainError,
    types::{ArtifactFormat, CaptureStatus, ErrorKind},
};

/// Reason a capture ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl CaptureFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// One pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureRecord {
    pub id: Uuid,
    pub owner_id: String,
    pub schedule_id: Option<String>,
    pub target_url: String,
    pub format: ArtifactFormat,
    pub dedupe_key: String,
    pub object_key: Option<String>,
    pub digest: Option<ContentDigest>,
    pub size_bytes: Option<u64>,
    pub status: CaptureStatus,
    pub requested_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
    pub duration_ms: Option<u64>,
    pub error: Option<CaptureFailure>,
    pub attempts: u32,
    pub retention_tier: String,
    /// Deadline after which a non-terminal record is considered abandoned.
    pub stale_after: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
}

/// Admission-time fields of a new capture.
#[derive(Debug, Clone)]
pub struct NewCapture {
    pub owner_id: String,
    pub schedule_id: Option<String>,
    pub target_url: String,
    pub format: ArtifactFormat,
    pub dedupe_key: String,
    pub retention_tier: String,
}

impl CaptureRecord {
    /// Build a `Queued` record with a time-ordered id.
    pub fn queued(new: NewCapture, now: OffsetDateTime, stale_window: Duration) -> Self {
        Self {
            id: Uuid::now_v7(),
            owner_id: new.owner_id,
            schedule_id: new.schedule_id,
            target_url: new.target_url,
            format: new.format,
            dedupe_key: new.dedupe_key,
            object_key: None,
            digest: None,
            size_bytes: None,
            status: CaptureStatus::Queued,
            requested_at: now,
            completed_at: None,
            duration_ms: None,
            error: None,
            attempts: 0,
            retention_tier: new.retention_tier,
            stale_after: Some(now + stale_window),
            updated_at: now,
        }
    }

    /// Storage location for this capture's artifact: date-partitioned, id-named.
    pub fn object_key(&self) -> String {
        object_key_for(self.id, self.requested_at, self.format)
    }

    /// Move to a non-terminal state, refreshing the staleness deadline.
    pub fn advance(
        &mut self,
        next: CaptureStatus,
        now: OffsetDateTime,
        stale_window: Duration,
    ) -> Result<(), DomainError> {
        if next.is_terminal() {
            return Err(DomainError::invariant(
                "terminal states are reached through succeed or fail",
            ));
        }
        self.ensure_transition(next)?;
        self.status = next;
        self.stale_after = Some(now + stale_window);
        self.updated_at = now;
        Ok(())
    }

    /// Refresh bookkeeping without changing state (retry attempts).
    pub fn touch(&mut self, now: OffsetDateTime, stale_window: Duration) {
        if !self.status.is_terminal() {
            self.stale_after = Some(now + stale_window);
        }
        self.updated_at = now;
    }

    pub fn succeed(
        &mut self,
        object_key: String,
        digest: ContentDigest,
        size_bytes: u64,
        now: OffsetDateTime,
        duration_ms: u64,
    ) -> Result<(), DomainError> {
        self.ensure_transition(CaptureStatus::Succeeded)?;
        self.status = CaptureStatus::Succeeded;
        self.object_key = Some(object_key);
        self.digest = Some(digest);
        self.size_bytes = Some(size_bytes);
        self.finish(now, duration_ms);
        Ok(())
    }

    pub fn fail(
        &mut self,
        failure: CaptureFailure,
        now: OffsetDateTime,
        duration_ms: u64,
    ) -> Result<(), DomainError> {
        self.ensure_transition(CaptureStatus::Failed)?;
        self.status = CaptureStatus::Failed;
        self.error = Some(failure);
        self.finish(now, duration_ms);
        Ok(())
    }

    /// Fail a stale record from whatever in-flight step it was left in.
    ///
    /// Only reconciliation takes this path; it is how a record stranded in
    /// `Hashing` (which has no failure edge of its own) is closed out.
    pub fn abandon(
        &mut self,
        failure: CaptureFailure,
        now: OffsetDateTime,
    ) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::IllegalTransition {
                from: self.status,
                to: CaptureStatus::Failed,
            });
        }
        let elapsed = (now - self.requested_at).whole_milliseconds().max(0);
        self.status = CaptureStatus::Failed;
        self.error = Some(failure);
        self.finish(now, u64::try_from(elapsed).unwrap_or(u64::MAX));
        Ok(())
    }

    /// Validate the record-level invariants before it is persisted.
    pub fn check_invariants(&self) -> Result<(), DomainError> {
        let succeeded = self.status == CaptureStatus::Succeeded;
        if succeeded != self.digest.is_some() || succeeded != self.object_key.is_some() {
            return Err(DomainError::invariant(format!(
                "capture {}: digest and object key must be set exactly when succeeded",
                self.id
            )));
        }
        if (self.status == CaptureStatus::Failed) != self.error.is_some() {
            return Err(DomainError::invariant(format!(
                "capture {}: error must be present exactly when failed",
                self.id
            )));
        }
        if self.status.is_terminal() != self.completed_at.is_some() {
            return Err(DomainError::invariant(format!(
                "capture {}: completion time must be set exactly when terminal",
                self.id
            )));
        }
        if self.status.is_terminal() == self.stale_after.is_some() {
            return Err(DomainError::invariant(format!(
                "capture {}: only in-flight records carry a staleness deadline",
                self.id
            )));
        }
        Ok(())
    }

    pub fn is_stale(&self, now: OffsetDateTime) -> bool {
        self.stale_after.is_some_and(|deadline| deadline <= now)
    }

    fn ensure_transition(&self, next: CaptureStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::IllegalTransition {
                from: self.status,
                to: next,
            })
        }
    }

    fn finish(&mut self, now: OffsetDateTime, duration_ms: u64) {
        self.completed_at = Some(now);
        self.duration_ms = Some(duration_ms);
        self.stale_after = None;
        self.updated_at = now;
    }
}

/// `captures/YYYY/MM/DD/<id>.<ext>`, using the admission date.
pub fn object_key_for(id: Uuid, requested_at: OffsetDateTime, format: ArtifactFormat) -> String {
    let (year, month, day) = requested_at.to_calendar_date();
    format!(
        "captures/{year:04}/{:02}/{day:02}/{id}.{}",
        month as u8,
        format.extension()
    )
}

/// Metadata attached to every stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObjectMetadata {
    pub digest: ContentDigest,
    pub target_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub capture_id: Uuid,
    pub owner_id: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub retention_tier: String,
    #[serde(with = "time::serde::rfc3339")]
    pub retention_until: OffsetDateTime,
}

/// Permanent failure parked for manual inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub capture_id: Uuid,
    pub owner_id: String,
    pub target_url: String,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
    pub failed_at: OffsetDateTime,
}

impl DeadLetter {
    /// Build the dead letter for a record that just reached `Failed`.
    pub fn for_failed(record: &CaptureRecord) -> Option<Self> {
        let failure = record.error.as_ref()?;
        Some(Self {
            id: Uuid::now_v7(),
            capture_id: record.id,
            owner_id: record.owner_id.clone(),
            target_url: record.target_url.clone(),
            kind: failure.kind,
            message: failure.message.clone(),
            attempts: record.attempts,
            failed_at: record.completed_at.unwrap_or(record.updated_at),
        })
    }
}
