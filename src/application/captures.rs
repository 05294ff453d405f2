//! Capture operations exposed to the routing layer and the CLI.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep, timeout};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::idempotency::{AdmissionError, CaptureRequest, IdempotencyCoordinator};
use crate::application::pagination::{
    CaptureCursor, CursorPage, DEFAULT_PAGE_LIMIT, PageRequest, PaginationError,
};
use crate::application::pipeline::{CaptureOrchestrator, PipelineError};
use crate::application::repos::{Admission, CaptureLedger, RepoError, TimeRange};
use crate::application::storage::{DownloadLink, ObjectStore, ObjectStoreError};
use crate::application::verify::{VerifyError, VerifyReport, Verifier};
use crate::domain::{
    digest::ContentDigest, entities::CaptureRecord, error::DomainError, types::CaptureStatus,
};

/// Hard ceiling for download link lifetimes.
pub const MAX_LINK_TTL: time::Duration = time::Duration::seconds(900);

const DEFAULT_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("capture not found")]
    NotFound,
    #[error("capture is {status:?}, not succeeded")]
    NotCaptured { status: CaptureStatus },
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Store(#[from] ObjectStoreError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error("capture {id} did not finish within {waited:?}")]
    WaitTimeout { id: Uuid, waited: Duration },
}

impl From<AdmissionError> for CaptureError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Invalid(err) => CaptureError::Domain(err),
            AdmissionError::Ledger(err) => CaptureError::Repo(err),
        }
    }
}

impl From<VerifyError> for CaptureError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::NotFound(_) => CaptureError::NotFound,
            VerifyError::Ledger(err) => CaptureError::Repo(err),
            VerifyError::Store(err) => CaptureError::Store(err),
            VerifyError::Corrupt { id, field } => CaptureError::Domain(DomainError::invariant(
                format!("capture {id} is succeeded but carries no {field}"),
            )),
        }
    }
}

/// Result of `trigger`: the record the caller should track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerOutcome {
    /// False when an equivalent capture already existed.
    pub admitted: bool,
    pub record: CaptureRecord,
}

/// What a reconciliation pass does with stale records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    Resume,
    Abandon,
}

pub struct CaptureService {
    ledger: Arc<dyn CaptureLedger>,
    store: Arc<dyn ObjectStore>,
    coordinator: IdempotencyCoordinator,
    orchestrator: Arc<CaptureOrchestrator>,
    verifier: Verifier,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    link_ttl: time::Duration,
}

impl CaptureService {
    pub fn new(
        ledger: Arc<dyn CaptureLedger>,
        store: Arc<dyn ObjectStore>,
        coordinator: IdempotencyCoordinator,
        orchestrator: Arc<CaptureOrchestrator>,
        verifier: Verifier,
        max_concurrency: usize,
        link_ttl: time::Duration,
    ) -> Self {
        Self {
            ledger,
            store,
            coordinator,
            orchestrator,
            verifier,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            max_concurrency: max_concurrency.max(1),
            link_ttl: link_ttl.min(MAX_LINK_TTL),
        }
    }

    pub fn orchestrator(&self) -> &Arc<CaptureOrchestrator> {
        &self.orchestrator
    }

    /// Admit a request and, when it is new, start its pipeline in the background.
    pub async fn trigger(&self, request: CaptureRequest) -> Result<TriggerOutcome, CaptureError> {
        match self.coordinator.admit(&request).await? {
            Admission::Admitted(record) => {
                self.spawn_pipeline(record.clone());
                Ok(TriggerOutcome {
                    admitted: true,
                    record,
                })
            }
            Admission::Existing(record) => Ok(TriggerOutcome {
                admitted: false,
                record,
            }),
        }
    }

    fn spawn_pipeline(&self, record: CaptureRecord) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!(
                    target = "application::captures::spawn_pipeline",
                    capture_id = %record.id,
                    "worker pool closed; capture left queued"
                );
                return;
            };
            let capture_id = record.id;
            if let Err(err) = orchestrator.execute(record).await {
                error!(
                    target = "application::captures::spawn_pipeline",
                    capture_id = %capture_id,
                    error = %err,
                    "capture pipeline aborted"
                );
            }
        });
    }

    /// Point lookup scoped to `owner_id`; other owners' records read as absent.
    pub async fn get(&self, owner_id: &str, id: Uuid) -> Result<CaptureRecord, CaptureError> {
        let record = self
            .bounded(self.ledger.get_record(id))
            .await?
            .ok_or(CaptureError::NotFound)?;
        if record.owner_id != owner_id {
            return Err(CaptureError::NotFound);
        }
        Ok(record)
    }

    pub async fn verify(&self, owner_id: &str, id: Uuid) -> Result<VerifyReport, CaptureError> {
        let record = self.get(owner_id, id).await?;
        Ok(self.verifier.verify_record(&record).await?)
    }

    pub async fn list_by_owner(
        &self,
        owner_id: &str,
        range: TimeRange,
        limit: Option<u32>,
        cursor: Option<&str>,
    ) -> Result<CursorPage<CaptureRecord>, CaptureError> {
        if range.is_empty() {
            return Err(DomainError::validation("`from` must be earlier than `to`").into());
        }
        let cursor = cursor
            .filter(|value| !value.is_empty())
            .map(CaptureCursor::decode)
            .transpose()?;
        let page = PageRequest::new(limit.unwrap_or(DEFAULT_PAGE_LIMIT), cursor);
        self.bounded(self.ledger.list_by_owner(owner_id, range, page))
            .await
    }

    pub async fn find_by_digest(
        &self,
        owner_id: &str,
        digest: &str,
    ) -> Result<Vec<CaptureRecord>, CaptureError> {
        let digest = ContentDigest::parse(digest)?;
        self.bounded(self.ledger.find_by_digest(owner_id, &digest))
            .await
    }

    /// Short-lived reference to the stored bytes of a succeeded capture.
    pub async fn resolve_download_location(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> Result<DownloadLink, CaptureError> {
        let record = self.get(owner_id, id).await?;
        let key = match (&record.status, &record.object_key) {
            (CaptureStatus::Succeeded, Some(key)) => key,
            (status, _) => return Err(CaptureError::NotCaptured { status: *status }),
        };
        let expires_at = OffsetDateTime::now_utc() + self.link_ttl;
        Ok(self.store.presign(key, expires_at).await?)
    }

    /// Poll the ledger until the record is terminal or `wait` elapses.
    pub async fn wait_for_terminal(
        &self,
        id: Uuid,
        wait: Duration,
    ) -> Result<CaptureRecord, CaptureError> {
        let deadline = Instant::now() + wait;
        loop {
            let record = self
                .bounded(self.ledger.get_record(id))
                .await?
                .ok_or(CaptureError::NotFound)?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            if Instant::now() >= deadline {
                return Err(CaptureError::WaitTimeout { id, waited: wait });
            }
            sleep(DEFAULT_WAIT_POLL_INTERVAL).await;
        }
    }

    pub async fn list_stale(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<CaptureRecord>, CaptureError> {
        self.bounded(self.ledger.list_stale(now, limit)).await
    }

    /// Re-drive or fail every stale record not already running here.
    pub async fn reconcile(
        &self,
        now: OffsetDateTime,
        limit: u32,
        mode: ReconcileMode,
    ) -> Result<Vec<CaptureRecord>, CaptureError> {
        let stale = self.list_stale(now, limit).await?;
        let settled: Vec<CaptureRecord> = stream::iter(stale)
            .filter(|record| {
                let busy = self.orchestrator.in_flight().contains(record.id);
                async move { !busy }
            })
            .map(|record| self.settle_stale(record, mode))
            .buffer_unordered(self.max_concurrency)
            .filter_map(|settled| async move { settled })
            .collect()
            .await;
        info!(
            target = "application::captures::reconcile",
            settled = settled.len(),
            "reconciliation pass finished"
        );
        Ok(settled)
    }

    async fn settle_stale(
        &self,
        record: CaptureRecord,
        mode: ReconcileMode,
    ) -> Option<CaptureRecord> {
        let result = match mode {
            ReconcileMode::Resume => self.orchestrator.resume(record.id).await,
            ReconcileMode::Abandon => {
                let reason = format!(
                    "abandoned by reconciliation while {}",
                    record.status.as_str()
                );
                self.orchestrator.abandon(record.id, reason).await
            }
        };
        match result {
            Ok(settled) => Some(settled),
            Err(PipelineError::Busy(_)) => None,
            Err(err) => {
                warn!(
                    target = "application::captures::reconcile",
                    capture_id = %record.id,
                    error = %err,
                    "could not settle stale capture"
                );
                None
            }
        }
    }

    /// Admit and run a capture in the caller's task.
    pub async fn capture_now(
        &self,
        request: CaptureRequest,
    ) -> Result<TriggerOutcome, CaptureError> {
        match self.coordinator.admit(&request).await? {
            Admission::Admitted(record) => {
                let _permit = self.permits.acquire().await.map_err(|err| {
                    CaptureError::Domain(DomainError::invariant(err.to_string()))
                })?;
                let record = self.orchestrator.execute(record).await?;
                Ok(TriggerOutcome {
                    admitted: true,
                    record,
                })
            }
            Admission::Existing(record) => Ok(TriggerOutcome {
                admitted: false,
                record,
            }),
        }
    }

    /// Await a ledger call under the pipeline's IO timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, RepoError>>,
    ) -> Result<T, CaptureError> {
        timeout(self.orchestrator.settings().io_timeout, call)
            .await
            .map_err(|_| CaptureError::Repo(RepoError::Timeout))?
            .map_err(CaptureError::from)
    }

    /// Ledger round-trip used by the health endpoint.
    pub async fn ping(&self, deadline: Duration) -> Result<(), CaptureError> {
        timeout(deadline, self.ledger.get_record(Uuid::nil()))
            .await
            .map_err(|_| CaptureError::Repo(RepoError::Timeout))??;
        Ok(())
    }
}
