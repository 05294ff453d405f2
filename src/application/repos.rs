//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::pagination::{CaptureCursor, CursorPage, PageRequest, PaginationError};
use crate::domain::digest::ContentDigest;
use crate::domain::entities::{CaptureRecord, DeadLetter};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Whether the failure may clear up on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::Persistence(_) | RepoError::Timeout)
    }
}

/// Result of an atomic create-if-absent on a dedupe key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The candidate record was stored in `Queued`; the caller owns execution.
    Admitted(CaptureRecord),
    /// A non-failed record already holds the key.
    Existing(CaptureRecord),
}

impl Admission {
    pub fn is_new(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }

    pub fn record(&self) -> &CaptureRecord {
        match self {
            Admission::Admitted(record) | Admission::Existing(record) => record,
        }
    }

    pub fn into_record(self) -> CaptureRecord {
        match self {
            Admission::Admitted(record) | Admission::Existing(record) => record,
        }
    }
}

/// Outcome of a monotonic record write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordWrite {
    Written,
    /// The stored record is terminal or further along; it was left as is.
    Superseded(CaptureRecord),
}

/// Half-open `[from, to)` window over `requested_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
}

impl TimeRange {
    pub fn new(from: Option<OffsetDateTime>, to: Option<OffsetDateTime>) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at < to)
    }

    pub fn is_empty(&self) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from >= to)
    }
}

/// Source of truth for capture records.
#[async_trait]
pub trait CaptureLedger: Send + Sync {
    /// Store `candidate` unless a non-failed record already holds its dedupe
    /// key. Implementations must make the check and the insert one atomic step.
    async fn admit(&self, candidate: CaptureRecord) -> Result<Admission, RepoError>;

    /// Persist a state change. Writes that would regress the stored status
    /// are not applied.
    async fn put_record(&self, record: &CaptureRecord) -> Result<RecordWrite, RepoError>;

    async fn get_record(&self, id: Uuid) -> Result<Option<CaptureRecord>, RepoError>;

    /// Newest first, ties broken by id.
    async fn list_by_owner(
        &self,
        owner_id: &str,
        range: TimeRange,
        page: PageRequest<CaptureCursor>,
    ) -> Result<CursorPage<CaptureRecord>, RepoError>;

    /// Succeeded records of `owner_id` whose stored bytes hash to `digest`.
    async fn find_by_digest(
        &self,
        owner_id: &str,
        digest: &ContentDigest,
    ) -> Result<Vec<CaptureRecord>, RepoError>;

    /// Non-terminal records whose staleness deadline is at or before `now`.
    async fn list_stale(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<CaptureRecord>, RepoError>;
}

/// Parking area for permanently failed captures.
#[async_trait]
pub trait DeadLetterRepo: Send + Sync {
    async fn push(&self, letter: &DeadLetter) -> Result<(), RepoError>;

    /// Most recent first.
    async fn list_recent(&self, limit: u32) -> Result<Vec<DeadLetter>, RepoError>;
}
