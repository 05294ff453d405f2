//! Drives one capture through render, hash, store and record.
//!
//! Every state change is persisted before the next step starts, so a crash
//! leaves the record in the step it reached with a staleness deadline.
//! [`CaptureOrchestrator::resume`] continues such a record without moving its
//! persisted state backwards.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::{counter, histogram};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::{Instant, sleep, timeout};
use tracing::{error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::application::renderer::{RenderError, RenderOptions, Renderer, Viewport};
use crate::application::repos::{CaptureLedger, DeadLetterRepo, RecordWrite, RepoError};
use crate::application::storage::{ObjectStore, ObjectStoreError, PutOutcome};
use crate::domain::{
    digest::ContentDigest,
    entities::{CaptureFailure, CaptureRecord, DeadLetter, StoredObjectMetadata},
    error::DomainError,
    retention::RetentionPolicy,
    types::{CaptureStatus, ErrorKind, WaitStrategy},
};

use super::in_flight::{InFlightCaptures, InFlightError};
use super::retry::RetryPolicy;

const METRIC_CAPTURE_TOTAL: &str = "evidentia_capture_total";
const METRIC_CAPTURE_DURATION_MS: &str = "evidentia_capture_duration_ms";
const METRIC_CAPTURE_RETRIES: &str = "evidentia_capture_retries_total";
const METRIC_STORE_CONFLICTS: &str = "evidentia_capture_store_conflicts_total";

/// Tunables handed to the orchestrator at construction.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    /// Upper bound for each store and ledger call.
    pub io_timeout: Duration,
    /// How long a non-terminal record may sit untouched before it is stale.
    pub stale_after: time::Duration,
    pub viewport: Viewport,
    pub wait_until: WaitStrategy,
    pub render_timeout: Duration,
}

impl PipelineSettings {
    pub fn render_options(&self, record: &CaptureRecord) -> RenderOptions {
        RenderOptions {
            format: record.format,
            viewport: self.viewport,
            wait_until: self.wait_until,
            timeout: self.render_timeout,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            io_timeout: Duration::from_secs(10),
            stale_after: time::Duration::minutes(15),
            viewport: Viewport::default(),
            wait_until: WaitStrategy::default(),
            render_timeout: crate::application::renderer::DEFAULT_RENDER_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The ledger stayed unreachable; the record keeps its last persisted
    /// state and becomes stale.
    #[error("capture ledger unavailable: {0}")]
    Ledger(#[source] RepoError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("capture {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Busy(#[from] InFlightError),
}

/// Why a run stopped before reaching `Succeeded`.
enum Stop {
    Failed(CaptureFailure),
    Superseded(CaptureRecord),
    Ledger(RepoError),
    Domain(DomainError),
}

impl From<DomainError> for Stop {
    fn from(err: DomainError) -> Self {
        Stop::Domain(err)
    }
}

pub struct CaptureOrchestrator {
    ledger: Arc<dyn CaptureLedger>,
    store: Arc<dyn ObjectStore>,
    renderer: Arc<dyn Renderer>,
    dead_letters: Arc<dyn DeadLetterRepo>,
    retention: RetentionPolicy,
    settings: PipelineSettings,
    in_flight: InFlightCaptures,
}

impl CaptureOrchestrator {
    pub fn new(
        ledger: Arc<dyn CaptureLedger>,
        store: Arc<dyn ObjectStore>,
        renderer: Arc<dyn Renderer>,
        dead_letters: Arc<dyn DeadLetterRepo>,
        retention: RetentionPolicy,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            ledger,
            store,
            renderer,
            dead_letters,
            retention,
            settings,
            in_flight: InFlightCaptures::new(),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    pub fn in_flight(&self) -> &InFlightCaptures {
        &self.in_flight
    }

    /// Run a freshly admitted record to a terminal state.
    pub async fn execute(&self, record: CaptureRecord) -> Result<CaptureRecord, PipelineError> {
        if record.status.is_terminal() {
            return Ok(record);
        }
        let _guard = self.in_flight.acquire(record.id)?;
        self.run(record).await
    }

    /// Continue a persisted record from the step it reached.
    pub async fn resume(&self, id: Uuid) -> Result<CaptureRecord, PipelineError> {
        let _guard = self.in_flight.acquire(id)?;
        let record = self.load(id).await?;
        if record.status.is_terminal() {
            return Ok(record);
        }
        info!(
            target = "application::pipeline::resume",
            capture_id = %record.id,
            status = record.status.as_str(),
            "resuming capture"
        );
        self.run(record).await
    }

    /// Close out a stale record without re-driving it.
    pub async fn abandon(
        &self,
        id: Uuid,
        reason: impl Into<String>,
    ) -> Result<CaptureRecord, PipelineError> {
        let _guard = self.in_flight.acquire(id)?;
        let record = self.load(id).await?;
        if record.status.is_terminal() {
            return Ok(record);
        }

        let mut failed = record.clone();
        let kind = match record.status {
            CaptureStatus::Recording => ErrorKind::LedgerWrite,
            CaptureStatus::Storing => ErrorKind::StoreWrite,
            _ => ErrorKind::TransientRender,
        };
        failed.abandon(
            CaptureFailure::new(kind, reason),
            OffsetDateTime::now_utc(),
        )?;
        self.settle_failure(failed).await
    }

    async fn load(&self, id: Uuid) -> Result<CaptureRecord, PipelineError> {
        match timeout(self.settings.io_timeout, self.ledger.get_record(id)).await {
            Ok(Ok(Some(record))) => Ok(record),
            Ok(Ok(None)) => Err(PipelineError::NotFound(id)),
            Ok(Err(err)) => Err(PipelineError::Ledger(err)),
            Err(_) => Err(PipelineError::Ledger(RepoError::Timeout)),
        }
    }

    async fn run(&self, mut record: CaptureRecord) -> Result<CaptureRecord, PipelineError> {
        let started = Instant::now();
        match self.drive(&mut record, started).await {
            Ok(()) => {
                counter!(METRIC_CAPTURE_TOTAL, "outcome" => "succeeded").increment(1);
                histogram!(METRIC_CAPTURE_DURATION_MS)
                    .record(started.elapsed().as_secs_f64() * 1000.0);
                info!(
                    target = "application::pipeline::run",
                    capture_id = %record.id,
                    dedupe_key = %record.dedupe_key,
                    digest = record.digest.as_ref().map(ContentDigest::as_str),
                    attempts = record.attempts,
                    duration_ms = record.duration_ms,
                    "capture succeeded"
                );
                Ok(record)
            }
            Err(Stop::Failed(failure)) => {
                let mut failed = record.clone();
                let now = OffsetDateTime::now_utc();
                if failed.status.can_transition_to(CaptureStatus::Failed) {
                    failed.fail(failure, now, elapsed_ms(started))?;
                } else {
                    failed.abandon(failure, now)?;
                    failed.duration_ms = Some(elapsed_ms(started));
                }
                self.settle_failure(failed).await
            }
            Err(Stop::Superseded(current)) => {
                info!(
                    target = "application::pipeline::run",
                    capture_id = %current.id,
                    status = current.status.as_str(),
                    "capture was completed elsewhere; stopping"
                );
                Ok(current)
            }
            Err(Stop::Ledger(err)) => {
                error!(
                    target = "application::pipeline::run",
                    capture_id = %record.id,
                    status = record.status.as_str(),
                    error = %err,
                    "ledger unavailable; capture left for reconciliation"
                );
                Err(PipelineError::Ledger(err))
            }
            Err(Stop::Domain(err)) => Err(PipelineError::Domain(err)),
        }
    }

    async fn drive(&self, record: &mut CaptureRecord, started: Instant) -> Result<(), Stop> {
        if record.status.rank() >= CaptureStatus::Storing.rank() {
            if let Some((digest, size_bytes)) = self.stored_copy(record).await? {
                info!(
                    target = "application::pipeline::drive",
                    capture_id = %record.id,
                    digest = %digest,
                    "re-using object already written for this capture"
                );
                return self.complete(record, digest, size_bytes, started).await;
            }
        }

        self.step(record, CaptureStatus::Rendering).await?;
        let url = Url::parse(&record.target_url).map_err(|err| {
            Stop::Failed(CaptureFailure::new(
                ErrorKind::Validation,
                format!("target url is not valid: {err}"),
            ))
        })?;
        let bytes = self.render_with_retry(record, &url).await?;

        self.step(record, CaptureStatus::Hashing).await?;
        let digest = ContentDigest::of(&bytes);
        let size_bytes = bytes.len() as u64;

        self.step(record, CaptureStatus::Storing).await?;
        let metadata = self.metadata_for(record, &digest, size_bytes)?;
        let key = record.object_key();
        let outcome = self.store_with_retry(&key, bytes, &metadata).await?;
        if outcome == PutOutcome::Replayed {
            info!(
                target = "application::pipeline::drive",
                capture_id = %record.id,
                object_key = %key,
                "object already present with identical digest"
            );
        }

        self.complete(record, digest, size_bytes, started).await
    }

    /// Recording step: the only write that turns a record `Succeeded`.
    async fn complete(
        &self,
        record: &mut CaptureRecord,
        digest: ContentDigest,
        size_bytes: u64,
        started: Instant,
    ) -> Result<(), Stop> {
        self.step(record, CaptureStatus::Recording).await?;

        let mut done = record.clone();
        done.succeed(
            record.object_key(),
            digest,
            size_bytes,
            OffsetDateTime::now_utc(),
            elapsed_ms(started),
        )?;
        match self.persist(&done).await {
            Ok(()) => {
                *record = done;
                Ok(())
            }
            Err(Stop::Ledger(err)) => Err(Stop::Failed(CaptureFailure::new(
                ErrorKind::LedgerWrite,
                format!("recording the result exhausted retries: {err}"),
            ))),
            Err(other) => Err(other),
        }
    }

    /// Enter `next`, or refresh the deadline when a resumed record is already past it.
    async fn step(&self, record: &mut CaptureRecord, next: CaptureStatus) -> Result<(), Stop> {
        let now = OffsetDateTime::now_utc();
        if next.rank() <= record.status.rank() {
            record.touch(now, self.settings.stale_after);
        } else {
            record.advance(next, now, self.settings.stale_after)?;
        }
        self.persist(record).await
    }

    async fn persist(&self, record: &CaptureRecord) -> Result<(), Stop> {
        record.check_invariants()?;

        let retry = self.settings.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match timeout(self.settings.io_timeout, self.ledger.put_record(record))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(RepoError::Timeout),
            };

            match result {
                Ok(RecordWrite::Written) => return Ok(()),
                Ok(RecordWrite::Superseded(current)) => return Err(Stop::Superseded(current)),
                Err(err) if err.is_transient() && retry.allows_another(attempt) => {
                    counter!(METRIC_CAPTURE_RETRIES, "step" => "recording").increment(1);
                    warn!(
                        target = "application::pipeline::persist",
                        capture_id = %record.id,
                        status = record.status.as_str(),
                        attempt,
                        error = %err,
                        "ledger write failed; retrying"
                    );
                    sleep(retry.backoff_after(attempt)).await;
                }
                Err(err) => return Err(Stop::Ledger(err)),
            }
        }
    }

    async fn render_with_retry(
        &self,
        record: &mut CaptureRecord,
        url: &Url,
    ) -> Result<Bytes, Stop> {
        let retry = self.settings.retry;
        let options = self.settings.render_options(record);
        let mut attempt = 0;
        loop {
            attempt += 1;
            record.attempts = record.attempts.saturating_add(1);

            let outcome = match timeout(options.timeout, self.renderer.render(url, &options)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(RenderError::Transient(format!(
                    "render timed out after {} ms",
                    options.timeout.as_millis()
                ))),
            };

            let message = match outcome {
                Ok(bytes) => return Ok(bytes),
                Err(RenderError::Permanent(message)) => {
                    return Err(Stop::Failed(CaptureFailure::new(
                        ErrorKind::PermanentRender,
                        message,
                    )));
                }
                Err(RenderError::Transient(message)) => message,
            };

            if !retry.allows_another(attempt) {
                return Err(Stop::Failed(CaptureFailure::new(
                    ErrorKind::TransientRender,
                    format!("render failed after {attempt} attempts: {message}"),
                )));
            }

            counter!(METRIC_CAPTURE_RETRIES, "step" => "rendering").increment(1);
            warn!(
                target = "application::pipeline::render",
                capture_id = %record.id,
                attempt,
                error = %message,
                "transient render failure; retrying"
            );
            sleep(retry.backoff_after(attempt)).await;

            record.touch(OffsetDateTime::now_utc(), self.settings.stale_after);
            self.persist(record).await?;
        }
    }

    async fn store_with_retry(
        &self,
        key: &str,
        bytes: Bytes,
        metadata: &StoredObjectMetadata,
    ) -> Result<PutOutcome, Stop> {
        let result = self
            .store_call(metadata.capture_id, key, || {
                self.store.put(key, bytes.clone(), metadata)
            })
            .await;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(ObjectStoreError::Conflict {
                key,
                existing,
                attempted,
            }) => {
                counter!(METRIC_STORE_CONFLICTS).increment(1);
                error!(
                    target: "evidentia::integrity",
                    capture_id = %metadata.capture_id,
                    object_key = %key,
                    existing = %existing,
                    attempted = %attempted,
                    "stored object holds a different digest; refusing to overwrite"
                );
                Err(Stop::Failed(CaptureFailure::new(
                    ErrorKind::StoreConflict,
                    format!(
                        "object `{key}` already holds digest {existing}, refused {attempted}"
                    ),
                )))
            }
            Err(err) => Err(Stop::Failed(CaptureFailure::new(
                ErrorKind::StoreWrite,
                err.to_string(),
            ))),
        }
    }

    /// Run one store call under the IO timeout, retrying transient failures.
    async fn store_call<T, F, Fut>(
        &self,
        capture_id: Uuid,
        key: &str,
        call: F,
    ) -> Result<T, ObjectStoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ObjectStoreError>>,
    {
        let retry = self.settings.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match timeout(self.settings.io_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ObjectStoreError::Unavailable(format!(
                    "call on `{key}` timed out"
                ))),
            };

            match result {
                Err(err) if err.is_transient() && retry.allows_another(attempt) => {
                    counter!(METRIC_CAPTURE_RETRIES, "step" => "storing").increment(1);
                    warn!(
                        target = "application::pipeline::store",
                        capture_id = %capture_id,
                        object_key = key,
                        attempt,
                        error = %err,
                        "store call failed; retrying"
                    );
                    sleep(retry.backoff_after(attempt)).await;
                }
                other => return other,
            }
        }
    }

    /// Digest and size of an object this capture wrote on an earlier run, if any.
    async fn stored_copy(
        &self,
        record: &CaptureRecord,
    ) -> Result<Option<(ContentDigest, u64)>, Stop> {
        let key = record.object_key();
        let head = self
            .store_call(record.id, &key, || self.store.head(&key))
            .await;

        match head {
            Ok(Some(metadata)) if metadata.capture_id == record.id => {
                Ok(Some((metadata.digest, metadata.size_bytes)))
            }
            // Another capture's object under this key surfaces as a conflict on put.
            Ok(_) => Ok(None),
            Err(ObjectStoreError::Metadata { message, .. }) => {
                warn!(
                    target = "application::pipeline::resume",
                    capture_id = %record.id,
                    object_key = %key,
                    error = %message,
                    "object metadata unreadable; re-hashing stored bytes"
                );
                self.rehash_stored(record, &key).await.map(Some)
            }
            Err(err) => Err(Stop::Failed(CaptureFailure::new(
                ErrorKind::StoreWrite,
                format!("could not inspect `{key}`: {err}"),
            ))),
        }
    }

    /// Fingerprint the bytes already under `key` and write their metadata again.
    async fn rehash_stored(
        &self,
        record: &CaptureRecord,
        key: &str,
    ) -> Result<(ContentDigest, u64), Stop> {
        let bytes = self
            .store_call(record.id, key, || self.store.get(key))
            .await
            .map_err(|err| {
                Stop::Failed(CaptureFailure::new(
                    ErrorKind::StoreWrite,
                    format!("could not read `{key}` back: {err}"),
                ))
            })?;
        let digest = ContentDigest::of(&bytes);
        let size_bytes = bytes.len() as u64;

        let metadata = self.metadata_for(record, &digest, size_bytes)?;
        self.store_with_retry(key, bytes, &metadata).await?;
        Ok((digest, size_bytes))
    }

    fn metadata_for(
        &self,
        record: &CaptureRecord,
        digest: &ContentDigest,
        size_bytes: u64,
    ) -> Result<StoredObjectMetadata, Stop> {
        let (tier, effect) = self
            .retention
            .resolve(Some(&record.retention_tier))
            .map_err(|err| {
                Stop::Failed(CaptureFailure::new(ErrorKind::Validation, err.to_string()))
            })?;
        let captured_at = OffsetDateTime::now_utc();
        Ok(StoredObjectMetadata {
            digest: digest.clone(),
            target_url: record.target_url.clone(),
            captured_at,
            capture_id: record.id,
            owner_id: record.owner_id.clone(),
            content_type: record.format.content_type().to_string(),
            size_bytes,
            retention_tier: tier.to_string(),
            retention_until: effect.retain_until(captured_at),
        })
    }

    /// Persist a failed record and park it on the dead-letter path.
    async fn settle_failure(&self, failed: CaptureRecord) -> Result<CaptureRecord, PipelineError> {
        match self.persist(&failed).await {
            Ok(()) => {}
            Err(Stop::Superseded(current)) => return Ok(current),
            Err(Stop::Ledger(err)) => return Err(PipelineError::Ledger(err)),
            Err(Stop::Domain(err)) => return Err(PipelineError::Domain(err)),
            Err(Stop::Failed(_)) => {}
        }

        let kind = failed
            .error
            .as_ref()
            .map_or("unknown", |failure| failure.kind.as_str());
        counter!(METRIC_CAPTURE_TOTAL, "outcome" => "failed", "kind" => kind).increment(1);
        warn!(
            target = "application::pipeline::run",
            capture_id = %failed.id,
            dedupe_key = %failed.dedupe_key,
            kind,
            message = failed.error.as_ref().map(|failure| failure.message.as_str()),
            attempts = failed.attempts,
            "capture failed"
        );

        if let Some(letter) = DeadLetter::for_failed(&failed) {
            let pushed = timeout(self.settings.io_timeout, self.dead_letters.push(&letter)).await;
            match pushed {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(
                    target = "application::pipeline::dead_letter",
                    capture_id = %failed.id,
                    error = %err,
                    "failed to record dead letter"
                ),
                Err(_) => error!(
                    target = "application::pipeline::dead_letter",
                    capture_id = %failed.id,
                    "dead letter write timed out"
                ),
            }
        }

        Ok(failed)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
