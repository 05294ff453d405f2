//! Process-local adapters used by the single-node runtime and the tests.

use std::cmp::Reverse;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::{
        pagination::{CaptureCursor, CursorPage, PageRequest},
        repos::{Admission, CaptureLedger, DeadLetterRepo, RecordWrite, RepoError, TimeRange},
        storage::{DownloadLink, ObjectStore, ObjectStoreError, PutOutcome},
    },
    domain::{
        digest::ContentDigest,
        entities::{CaptureRecord, DeadLetter, StoredObjectMetadata},
        types::CaptureStatus,
    },
    infra::links::LinkSigner,
};

const MAX_STALE_BATCH: u32 = 1_000;

/// Ledger kept in a concurrent map.
///
/// `live_keys` maps each dedupe key to the record currently holding it. Admission
/// holds the key's entry while it inspects and inserts records; `put_record`
/// only ever touches `records`, so the two locks are always taken in one order.
#[derive(Debug, Default, Clone)]
pub struct MemoryLedger {
    records: Arc<DashMap<Uuid, CaptureRecord>>,
    live_keys: Arc<DashMap<String, Uuid>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert_new(&self, candidate: &CaptureRecord) -> Result<(), RepoError> {
        match self.records.entry(candidate.id) {
            Entry::Occupied(_) => Err(RepoError::Duplicate {
                constraint: "captures_pkey".to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(candidate.clone());
                Ok(())
            }
        }
    }

    fn snapshot<F>(&self, mut keep: F) -> Vec<CaptureRecord>
    where
        F: FnMut(&CaptureRecord) -> bool,
    {
        self.records
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn newest_first(records: &mut [CaptureRecord]) {
    records.sort_by_key(|record| Reverse((record.requested_at, record.id)));
}

fn invalid(err: impl std::fmt::Display) -> RepoError {
    RepoError::InvalidInput {
        message: err.to_string(),
    }
}

#[async_trait]
impl CaptureLedger for MemoryLedger {
    async fn admit(&self, candidate: CaptureRecord) -> Result<Admission, RepoError> {
        candidate.check_invariants().map_err(invalid)?;

        match self.live_keys.entry(candidate.dedupe_key.clone()) {
            Entry::Occupied(mut claim) => {
                let holder = self.records.get(claim.get()).map(|entry| entry.clone());
                match holder {
                    Some(existing) if existing.status != CaptureStatus::Failed => {
                        Ok(Admission::Existing(existing))
                    }
                    _ => {
                        self.insert_new(&candidate)?;
                        claim.insert(candidate.id);
                        Ok(Admission::Admitted(candidate))
                    }
                }
            }
            Entry::Vacant(claim) => {
                self.insert_new(&candidate)?;
                claim.insert(candidate.id);
                Ok(Admission::Admitted(candidate))
            }
        }
    }

    async fn put_record(&self, record: &CaptureRecord) -> Result<RecordWrite, RepoError> {
        record.check_invariants().map_err(invalid)?;

        let mut stored = self.records.get_mut(&record.id).ok_or(RepoError::NotFound)?;
        if stored.dedupe_key != record.dedupe_key || stored.owner_id != record.owner_id {
            return Err(RepoError::Integrity {
                message: format!("capture {} identity fields cannot change", record.id),
            });
        }
        if !stored.status.accepts_write_of(record.status) {
            return Ok(RecordWrite::Superseded(stored.clone()));
        }
        *stored = record.clone();
        Ok(RecordWrite::Written)
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<CaptureRecord>, RepoError> {
        Ok(self.records.get(&id).map(|entry| entry.clone()))
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        range: TimeRange,
        page: PageRequest<CaptureCursor>,
    ) -> Result<CursorPage<CaptureRecord>, RepoError> {
        let limit = page.limit.max(1) as usize;
        let mut items = self.snapshot(|record| {
            record.owner_id == owner_id
                && range.contains(record.requested_at)
                && page
                    .cursor
                    .is_none_or(|cursor| cursor.precedes(record.requested_at, record.id))
        });
        newest_first(&mut items);

        let next_cursor = if items.len() > limit {
            items.truncate(limit);
            items
                .last()
                .map(|last| CaptureCursor::new(last.requested_at, last.id).encode())
                .transpose()?
        } else {
            None
        };

        Ok(CursorPage::new(items, next_cursor))
    }

    async fn find_by_digest(
        &self,
        owner_id: &str,
        digest: &ContentDigest,
    ) -> Result<Vec<CaptureRecord>, RepoError> {
        let mut items = self.snapshot(|record| {
            record.owner_id == owner_id
                && record.status == CaptureStatus::Succeeded
                && record.digest.as_ref().is_some_and(|stored| stored.matches(digest))
        });
        newest_first(&mut items);
        Ok(items)
    }

    async fn list_stale(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<CaptureRecord>, RepoError> {
        let mut items =
            self.snapshot(|record| !record.status.is_terminal() && record.is_stale(now));
        items.sort_by_key(|record| (record.stale_after, record.id));
        items.truncate(limit.clamp(1, MAX_STALE_BATCH) as usize);
        Ok(items)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryDeadLetters {
    letters: Arc<DashMap<Uuid, DeadLetter>>,
}

impl MemoryDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.letters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.letters.is_empty()
    }
}

#[async_trait]
impl DeadLetterRepo for MemoryDeadLetters {
    async fn push(&self, letter: &DeadLetter) -> Result<(), RepoError> {
        self.letters.insert(letter.id, letter.clone());
        Ok(())
    }

    async fn list_recent(&self, limit: u32) -> Result<Vec<DeadLetter>, RepoError> {
        let mut letters: Vec<DeadLetter> = self
            .letters
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        letters.sort_by_key(|letter| Reverse((letter.failed_at, letter.id)));
        letters.truncate(limit as usize);
        Ok(letters)
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    metadata: StoredObjectMetadata,
}

/// Write-once store held in memory; contents vanish with the process.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<DashMap<String, StoredObject>>,
    signer: LinkSigner,
}

impl MemoryObjectStore {
    pub fn new(signer: LinkSigner) -> Self {
        Self {
            objects: Arc::new(DashMap::new()),
            signer,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn check_key(key: &str) -> Result<(), ObjectStoreError> {
    if key.is_empty() || key.starts_with('/') || key.split('/').any(|part| part == "..") {
        return Err(ObjectStoreError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        metadata: &StoredObjectMetadata,
    ) -> Result<PutOutcome, ObjectStoreError> {
        check_key(key)?;
        if !ContentDigest::of(&bytes).matches(&metadata.digest) {
            return Err(ObjectStoreError::Metadata {
                key: key.to_string(),
                message: "attached digest does not describe the payload".to_string(),
            });
        }

        match self.objects.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                let existing = &existing.get().metadata.digest;
                if existing.matches(&metadata.digest) {
                    Ok(PutOutcome::Replayed)
                } else {
                    Err(ObjectStoreError::Conflict {
                        key: key.to_string(),
                        existing: existing.clone(),
                        attempted: metadata.digest.clone(),
                    })
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(StoredObject {
                    bytes,
                    metadata: metadata.clone(),
                });
                Ok(PutOutcome::Created)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        check_key(key)?;
        self.objects
            .get(key)
            .map(|object| object.bytes.clone())
            .ok_or_else(|| ObjectStoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn head(&self, key: &str) -> Result<Option<StoredObjectMetadata>, ObjectStoreError> {
        check_key(key)?;
        Ok(self.objects.get(key).map(|object| object.metadata.clone()))
    }

    async fn presign(
        &self,
        key: &str,
        expires_at: OffsetDateTime,
    ) -> Result<DownloadLink, ObjectStoreError> {
        check_key(key)?;
        if !self.objects.contains_key(key) {
            return Err(ObjectStoreError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(self.signer.sign(key, expires_at))
    }
}

#[cfg(test)]
mod tests {
    use time::{Duration, macros::datetime};

    use super::*;
    use crate::domain::{
        entities::{CaptureFailure, NewCapture},
        types::{ArtifactFormat, ErrorKind},
    };

    fn candidate(owner: &str, key: &str, at: OffsetDateTime) -> CaptureRecord {
        CaptureRecord::queued(
            NewCapture {
                owner_id: owner.into(),
                schedule_id: None,
                target_url: "https://example.com/".into(),
                format: ArtifactFormat::Pdf,
                dedupe_key: key.into(),
                retention_tier: "standard".into(),
            },
            at,
            Duration::minutes(15),
        )
    }

    fn metadata(bytes: &[u8]) -> StoredObjectMetadata {
        let at = datetime!(2026-03-02 08:00 UTC);
        StoredObjectMetadata {
            digest: ContentDigest::of(bytes),
            target_url: "https://example.com/".into(),
            captured_at: at,
            capture_id: Uuid::now_v7(),
            owner_id: "tenant-a".into(),
            content_type: "application/pdf".into(),
            size_bytes: bytes.len() as u64,
            retention_tier: "standard".into(),
            retention_until: at + Duration::days(30),
        }
    }

    #[tokio::test]
    async fn admission_returns_live_holder_until_it_fails() {
        let ledger = MemoryLedger::new();
        let at = datetime!(2026-03-02 08:00 UTC);

        let first = ledger
            .admit(candidate("tenant-a", "k1", at))
            .await
            .expect("admit");
        assert!(first.is_new());

        let again = ledger
            .admit(candidate("tenant-a", "k1", at))
            .await
            .expect("admit");
        assert!(!again.is_new());
        assert_eq!(again.record().id, first.record().id);

        let mut failed = first.into_record();
        failed
            .advance(CaptureStatus::Rendering, at, Duration::minutes(15))
            .expect("advance");
        failed
            .fail(CaptureFailure::new(ErrorKind::PermanentRender, "404"), at, 10)
            .expect("fail");
        ledger.put_record(&failed).await.expect("put");

        let retry = ledger
            .admit(candidate("tenant-a", "k1", at))
            .await
            .expect("admit");
        assert!(retry.is_new());
        assert_ne!(retry.record().id, failed.id);
        assert_eq!(ledger.len(), 2);
    }

    #[tokio::test]
    async fn terminal_records_reject_later_writes() {
        let ledger = MemoryLedger::new();
        let at = datetime!(2026-03-02 08:00 UTC);
        let admitted = ledger
            .admit(candidate("tenant-a", "k2", at))
            .await
            .expect("admit")
            .into_record();

        let mut rendering = admitted.clone();
        rendering
            .advance(CaptureStatus::Rendering, at, Duration::minutes(15))
            .expect("advance");
        let mut failed = rendering.clone();
        failed
            .fail(CaptureFailure::new(ErrorKind::TransientRender, "timeout"), at, 10)
            .expect("fail");

        assert_eq!(
            ledger.put_record(&failed).await.expect("put"),
            RecordWrite::Written
        );
        match ledger.put_record(&rendering).await.expect("put") {
            RecordWrite::Superseded(current) => assert_eq!(current.status, CaptureStatus::Failed),
            other => panic!("unexpected write outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn listing_pages_newest_first_with_cursor() {
        let ledger = MemoryLedger::new();
        let base = datetime!(2026-03-02 08:00 UTC);
        for offset in 0..5 {
            ledger
                .admit(candidate(
                    "tenant-a",
                    &format!("k{offset}"),
                    base + Duration::minutes(offset),
                ))
                .await
                .expect("admit");
        }
        ledger
            .admit(candidate("tenant-b", "other", base))
            .await
            .expect("admit");

        let first = ledger
            .list_by_owner("tenant-a", TimeRange::default(), PageRequest::new(3, None))
            .await
            .expect("page");
        assert_eq!(first.items.len(), 3);
        assert_eq!(first.items[0].requested_at, base + Duration::minutes(4));
        let cursor = CaptureCursor::decode(first.next_cursor.as_deref().expect("cursor"))
            .expect("decode");

        let second = ledger
            .list_by_owner(
                "tenant-a",
                TimeRange::default(),
                PageRequest::new(3, Some(cursor)),
            )
            .await
            .expect("page");
        assert_eq!(second.items.len(), 2);
        assert!(second.next_cursor.is_none());
        assert_eq!(second.items[1].requested_at, base);
    }

    #[tokio::test]
    async fn object_store_is_write_once() {
        let signer = LinkSigner::new(vec![1u8; 32], "").expect("signer");
        let store = MemoryObjectStore::new(signer);
        let key = "captures/2026/03/02/a.pdf";

        let original = metadata(b"first");
        assert_eq!(
            store
                .put(key, Bytes::from_static(b"first"), &original)
                .await
                .expect("put"),
            PutOutcome::Created
        );
        assert_eq!(
            store
                .put(key, Bytes::from_static(b"first"), &original)
                .await
                .expect("replay"),
            PutOutcome::Replayed
        );
        let err = store
            .put(key, Bytes::from_static(b"second"), &metadata(b"second"))
            .await
            .expect_err("conflict");
        assert!(matches!(err, ObjectStoreError::Conflict { .. }));
        assert_eq!(store.get(key).await.expect("get"), Bytes::from_static(b"first"));
    }
}
