#![allow(dead_code)]

use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;

use evidentia::application::captures::CaptureService;
use evidentia::application::idempotency::{CaptureRequest, IdempotencyCoordinator};
use evidentia::application::pagination::{CaptureCursor, CursorPage, PageRequest};
use evidentia::application::pipeline::{CaptureOrchestrator, PipelineSettings, RetryPolicy};
use evidentia::application::renderer::{RenderError, RenderOptions, Renderer};
use evidentia::application::repos::{
    Admission, CaptureLedger, RecordWrite, RepoError, TimeRange,
};
use evidentia::application::storage::{DownloadLink, ObjectStore, ObjectStoreError, PutOutcome};
use evidentia::application::verify::Verifier;
use evidentia::domain::dedupe::BucketWidth;
use evidentia::domain::digest::ContentDigest;
use evidentia::domain::entities::{CaptureRecord, StoredObjectMetadata};
use evidentia::domain::retention::RetentionPolicy;
use evidentia::domain::types::CaptureStatus;
use evidentia::infra::links::LinkSigner;
use evidentia::infra::memory::{MemoryDeadLetters, MemoryLedger, MemoryObjectStore};
use evidentia::infra::render::StaticRenderer;

pub const LINK_SECRET: &str = "integration-test-link-secret-0123456789";
pub const OWNER: &str = "tenant-a";

pub fn signer() -> LinkSigner {
    LinkSigner::new(LINK_SECRET, "").expect("valid signer")
}

pub fn request(url: &str) -> CaptureRequest {
    CaptureRequest {
        owner_id: OWNER.to_string(),
        target_url: url.to_string(),
        ..Default::default()
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts: NonZeroU32::new(max_attempts).expect("non-zero attempts"),
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        multiplier: 2,
    }
}

/// Renderer that plays back a fixed script, then falls back to placeholder artifacts.
#[derive(Default)]
pub struct ScriptedRenderer {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
}

pub enum Step {
    Fail(RenderError),
    /// Never answers; the pipeline's render timeout fires instead.
    Hang,
    Bytes(Bytes),
}

impl ScriptedRenderer {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn render(&self, url: &Url, options: &RenderOptions) -> Result<Bytes, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().await.pop_front();
        match step {
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Hang) => std::future::pending().await,
            Some(Step::Bytes(bytes)) => Ok(bytes),
            None => Ok(StaticRenderer::artifact(url, options.format)),
        }
    }
}

/// Ledger that refuses writes carrying one status until healed, and can
/// stop answering reads altogether.
pub struct FlakyLedger {
    inner: MemoryLedger,
    failing: std::sync::Mutex<Option<CaptureStatus>>,
    rejected: AtomicU32,
    stalled: AtomicBool,
}

impl FlakyLedger {
    pub fn failing_on(status: CaptureStatus) -> Self {
        Self::with_failing(Some(status))
    }

    pub fn healthy() -> Self {
        Self::with_failing(None)
    }

    fn with_failing(failing: Option<CaptureStatus>) -> Self {
        Self {
            inner: MemoryLedger::new(),
            failing: std::sync::Mutex::new(failing),
            rejected: AtomicU32::new(0),
            stalled: AtomicBool::new(false),
        }
    }

    /// Reads hang from now on.
    pub fn stall_reads(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    async fn read_gate(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    pub fn heal(&self) {
        *self.failing.lock().expect("lock") = None;
    }

    pub fn rejected(&self) -> u32 {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureLedger for FlakyLedger {
    async fn admit(&self, candidate: CaptureRecord) -> Result<Admission, RepoError> {
        self.inner.admit(candidate).await
    }

    async fn put_record(&self, record: &CaptureRecord) -> Result<RecordWrite, RepoError> {
        let failing = *self.failing.lock().expect("lock");
        if failing == Some(record.status) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(RepoError::Persistence("ledger unreachable".to_string()));
        }
        self.inner.put_record(record).await
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<CaptureRecord>, RepoError> {
        self.read_gate().await;
        self.inner.get_record(id).await
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        range: TimeRange,
        page: PageRequest<CaptureCursor>,
    ) -> Result<CursorPage<CaptureRecord>, RepoError> {
        self.read_gate().await;
        self.inner.list_by_owner(owner_id, range, page).await
    }

    async fn find_by_digest(
        &self,
        owner_id: &str,
        digest: &ContentDigest,
    ) -> Result<Vec<CaptureRecord>, RepoError> {
        self.read_gate().await;
        self.inner.find_by_digest(owner_id, digest).await
    }

    async fn list_stale(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<CaptureRecord>, RepoError> {
        self.read_gate().await;
        self.inner.list_stale(now, limit).await
    }
}

/// In-memory store whose first `head` calls report an outage.
pub struct FlakyStore {
    inner: MemoryObjectStore,
    failing_heads: AtomicU32,
    heads: AtomicU32,
}

impl FlakyStore {
    pub fn failing_heads(count: u32) -> Self {
        Self {
            inner: MemoryObjectStore::new(signer()),
            failing_heads: AtomicU32::new(count),
            heads: AtomicU32::new(0),
        }
    }

    pub fn heads(&self) -> u32 {
        self.heads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        metadata: &StoredObjectMetadata,
    ) -> Result<PutOutcome, ObjectStoreError> {
        self.inner.put(key, bytes, metadata).await
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        self.inner.get(key).await
    }

    async fn head(&self, key: &str) -> Result<Option<StoredObjectMetadata>, ObjectStoreError> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        let outage = self
            .failing_heads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if outage {
            return Err(ObjectStoreError::Unavailable("store endpoint reset".to_string()));
        }
        self.inner.head(key).await
    }

    async fn presign(
        &self,
        key: &str,
        expires_at: OffsetDateTime,
    ) -> Result<DownloadLink, ObjectStoreError> {
        self.inner.presign(key, expires_at).await
    }
}

/// Fully wired service over in-process adapters.
pub struct Harness {
    pub ledger: Arc<dyn CaptureLedger>,
    pub dead_letters: Arc<MemoryDeadLetters>,
    pub store: Arc<dyn ObjectStore>,
    pub orchestrator: Arc<CaptureOrchestrator>,
    pub captures: Arc<CaptureService>,
}

pub struct HarnessBuilder {
    ledger: Arc<dyn CaptureLedger>,
    store: Option<Arc<dyn ObjectStore>>,
    renderer: Arc<dyn Renderer>,
    settings: PipelineSettings,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            ledger: Arc::new(MemoryLedger::new()),
            store: None,
            renderer: Arc::new(StaticRenderer),
            settings: PipelineSettings {
                retry: fast_retry(3),
                ..PipelineSettings::default()
            },
        }
    }
}

impl HarnessBuilder {
    pub fn ledger(mut self, ledger: Arc<dyn CaptureLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Harness {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryObjectStore::new(signer())));
        let dead_letters = Arc::new(MemoryDeadLetters::new());
        let retention = RetentionPolicy::default();

        let coordinator = IdempotencyCoordinator::new(
            self.ledger.clone(),
            BucketWidth::default(),
            retention.clone(),
            self.settings.stale_after,
            self.settings.io_timeout,
        );
        let orchestrator = Arc::new(CaptureOrchestrator::new(
            self.ledger.clone(),
            store.clone(),
            self.renderer,
            dead_letters.clone(),
            retention,
            self.settings.clone(),
        ));
        let verifier = Verifier::new(self.ledger.clone(), store.clone(), self.settings.io_timeout);
        let captures = Arc::new(CaptureService::new(
            self.ledger.clone(),
            store.clone(),
            coordinator,
            orchestrator.clone(),
            verifier,
            4,
            time::Duration::minutes(5),
        ));

        Harness {
            ledger: self.ledger,
            dead_letters,
            store,
            orchestrator,
            captures,
        }
    }
}
