//! Re-verification of stored artifacts against their recorded digest.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{error, info};
use uuid::Uuid;

use crate::application::repos::{CaptureLedger, RepoError};
use crate::application::storage::{ObjectStore, ObjectStoreError};
use crate::domain::{digest::ContentDigest, entities::CaptureRecord, types::CaptureStatus};

const METRIC_VERIFY_TOTAL: &str = "evidentia_verify_total";
const METRIC_VERIFY_MISMATCH: &str = "evidentia_verify_mismatch_total";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified {
        digest: ContentDigest,
    },
    /// Stored bytes no longer hash to the recorded value.
    DigestMismatch {
        recorded: ContentDigest,
        computed: ContentDigest,
    },
    /// The record says succeeded but the store has nothing under its key.
    ObjectMissing {
        recorded: ContentDigest,
    },
    /// The record has not reached `Succeeded`.
    NotCaptured {
        status: CaptureStatus,
    },
}

impl VerifyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyOutcome::Verified { .. } => "verified",
            VerifyOutcome::DigestMismatch { .. } => "digest_mismatch",
            VerifyOutcome::ObjectMissing { .. } => "object_missing",
            VerifyOutcome::NotCaptured { .. } => "not_captured",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub id: Uuid,
    pub outcome: VerifyOutcome,
}

impl VerifyReport {
    pub fn ok(&self) -> bool {
        matches!(self.outcome, VerifyOutcome::Verified { .. })
    }

    pub fn digest_matches(&self) -> bool {
        self.ok()
    }

    pub fn recorded_digest(&self) -> Option<&ContentDigest> {
        match &self.outcome {
            VerifyOutcome::Verified { digest } => Some(digest),
            VerifyOutcome::DigestMismatch { recorded, .. }
            | VerifyOutcome::ObjectMissing { recorded } => Some(recorded),
            VerifyOutcome::NotCaptured { .. } => None,
        }
    }

    pub fn computed_digest(&self) -> Option<&ContentDigest> {
        match &self.outcome {
            VerifyOutcome::Verified { digest } => Some(digest),
            VerifyOutcome::DigestMismatch { computed, .. } => Some(computed),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("capture {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Ledger(#[from] RepoError),
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
    #[error("capture {id} is succeeded but carries no {field}")]
    Corrupt { id: Uuid, field: &'static str },
}

pub struct Verifier {
    ledger: Arc<dyn CaptureLedger>,
    store: Arc<dyn ObjectStore>,
    io_timeout: Duration,
}

impl Verifier {
    pub fn new(
        ledger: Arc<dyn CaptureLedger>,
        store: Arc<dyn ObjectStore>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            io_timeout,
        }
    }

    pub async fn verify(&self, id: Uuid) -> Result<VerifyReport, VerifyError> {
        let record = timeout(self.io_timeout, self.ledger.get_record(id))
            .await
            .map_err(|_| VerifyError::Ledger(RepoError::Timeout))??
            .ok_or(VerifyError::NotFound(id))?;
        self.verify_record(&record).await
    }

    /// Verify an already loaded record.
    pub async fn verify_record(&self, record: &CaptureRecord) -> Result<VerifyReport, VerifyError> {
        let outcome = self.check(record).await?;
        counter!(METRIC_VERIFY_TOTAL, "outcome" => outcome.as_str()).increment(1);

        match &outcome {
            VerifyOutcome::DigestMismatch { recorded, computed } => {
                counter!(METRIC_VERIFY_MISMATCH).increment(1);
                error!(
                    target: "evidentia::integrity",
                    capture_id = %record.id,
                    object_key = record.object_key.as_deref(),
                    recorded = %recorded,
                    computed = %computed,
                    "stored artifact does not match its recorded digest"
                );
            }
            VerifyOutcome::ObjectMissing { recorded } => {
                error!(
                    target: "evidentia::integrity",
                    capture_id = %record.id,
                    object_key = record.object_key.as_deref(),
                    recorded = %recorded,
                    "stored artifact is missing"
                );
            }
            VerifyOutcome::Verified { .. } | VerifyOutcome::NotCaptured { .. } => {
                info!(
                    target = "application::verify",
                    capture_id = %record.id,
                    outcome = outcome.as_str(),
                    "verification finished"
                );
            }
        }

        Ok(VerifyReport {
            id: record.id,
            outcome,
        })
    }

    async fn check(&self, record: &CaptureRecord) -> Result<VerifyOutcome, VerifyError> {
        if record.status != CaptureStatus::Succeeded {
            return Ok(VerifyOutcome::NotCaptured {
                status: record.status,
            });
        }

        let recorded = record.digest.clone().ok_or(VerifyError::Corrupt {
            id: record.id,
            field: "digest",
        })?;
        let key = record.object_key.as_deref().ok_or(VerifyError::Corrupt {
            id: record.id,
            field: "object key",
        })?;

        let fetched = timeout(self.io_timeout, self.store.get(key))
            .await
            .map_err(|_| {
                VerifyError::Store(ObjectStoreError::Unavailable(format!(
                    "read of `{key}` timed out"
                )))
            })?;
        let bytes = match fetched {
            Ok(bytes) => bytes,
            Err(ObjectStoreError::NotFound { .. }) => {
                return Ok(VerifyOutcome::ObjectMissing { recorded });
            }
            Err(err) => return Err(err.into()),
        };

        let computed = ContentDigest::of(&bytes);
        if computed.matches(&recorded) {
            Ok(VerifyOutcome::Verified { digest: recorded })
        } else {
            Ok(VerifyOutcome::DigestMismatch { recorded, computed })
        }
    }
}
