#![cfg(unix)]

mod support;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use tempfile::TempDir;

use evidentia::application::storage::{ObjectStoreError, PutOutcome};
use evidentia::application::verify::VerifyOutcome;
use evidentia::domain::digest::ContentDigest;
use evidentia::domain::types::CaptureStatus;
use evidentia::infra::object_store::FilesystemObjectStore;

use support::{HarnessBuilder, OWNER, request, signer};

fn filesystem_store() -> (TempDir, Arc<FilesystemObjectStore>) {
    let dir = TempDir::new().expect("tempdir");
    let store = FilesystemObjectStore::new(dir.path().join("objects"), signer()).expect("store");
    (dir, Arc::new(store))
}

fn make_writable(path: &std::path::Path) {
    let mut permissions = fs::metadata(path).expect("metadata").permissions();
    permissions.set_mode(0o644);
    fs::set_permissions(path, permissions).expect("chmod");
}

#[tokio::test]
async fn untouched_capture_verifies() {
    let (_dir, store) = filesystem_store();
    let harness = HarnessBuilder::default().store(store.clone()).build();

    let record = harness
        .captures
        .capture_now(request("https://example.com/terms"))
        .await
        .expect("capture")
        .record;
    assert_eq!(record.status, CaptureStatus::Succeeded);

    let path = store
        .absolute_path(record.object_key.as_deref().expect("key"))
        .expect("path");
    let mode = fs::metadata(&path).expect("metadata").permissions().mode();
    assert_eq!(mode & 0o222, 0, "stored objects are read-only");

    let report = harness
        .captures
        .verify(OWNER, record.id)
        .await
        .expect("verify");
    assert!(report.ok());
    assert_eq!(report.recorded_digest(), record.digest.as_ref());
}

#[tokio::test]
async fn tampered_bytes_are_reported_as_mismatch() {
    let (_dir, store) = filesystem_store();
    let harness = HarnessBuilder::default().store(store.clone()).build();

    let record = harness
        .captures
        .capture_now(request("https://example.com/terms"))
        .await
        .expect("capture")
        .record;
    let path = store
        .absolute_path(record.object_key.as_deref().expect("key"))
        .expect("path");

    make_writable(&path);
    fs::write(&path, b"%PDF-1.4\n% altered after capture\n").expect("tamper");

    let report = harness
        .captures
        .verify(OWNER, record.id)
        .await
        .expect("verify");
    assert!(!report.ok());
    match report.outcome {
        VerifyOutcome::DigestMismatch { recorded, computed } => {
            assert_eq!(Some(&recorded), record.digest.as_ref());
            assert_eq!(
                computed,
                ContentDigest::of(b"%PDF-1.4\n% altered after capture\n")
            );
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn deleted_object_is_reported_missing() {
    let (_dir, store) = filesystem_store();
    let harness = HarnessBuilder::default().store(store.clone()).build();

    let record = harness
        .captures
        .capture_now(request("https://example.com/terms"))
        .await
        .expect("capture")
        .record;
    let path = store
        .absolute_path(record.object_key.as_deref().expect("key"))
        .expect("path");
    fs::remove_file(&path).expect("remove");

    let report = harness
        .captures
        .verify(OWNER, record.id)
        .await
        .expect("verify");
    assert!(matches!(report.outcome, VerifyOutcome::ObjectMissing { .. }));
}

#[tokio::test]
async fn unfinished_capture_is_not_verifiable() {
    let harness = HarnessBuilder::default()
        .renderer(Arc::new(support::ScriptedRenderer::new([support::Step::Hang])))
        .build();

    let pending = harness
        .captures
        .trigger(request("https://example.com/slow"))
        .await
        .expect("trigger")
        .record;
    let report = harness
        .captures
        .verify(OWNER, pending.id)
        .await
        .expect("verify");
    assert!(matches!(report.outcome, VerifyOutcome::NotCaptured { .. }));
    assert!(report.computed_digest().is_none());
}

#[tokio::test]
async fn replayed_put_restores_a_missing_sidecar() {
    let (_dir, store) = filesystem_store();
    let harness = HarnessBuilder::default().store(store.clone()).build();

    let record = harness
        .captures
        .capture_now(request("https://example.com/terms"))
        .await
        .expect("capture")
        .record;
    let key = record.object_key.clone().expect("key");
    let metadata = harness.store.head(&key).await.expect("head").expect("meta");

    let object = store.absolute_path(&key).expect("path");
    let mut sidecar = object.into_os_string();
    sidecar.push(".meta.json");
    fs::remove_file(&sidecar).expect("remove sidecar");

    let err = harness.store.head(&key).await.expect_err("sidecar gone");
    assert!(matches!(err, ObjectStoreError::Metadata { .. }));

    let bytes = harness.store.get(&key).await.expect("bytes");
    let outcome = harness
        .store
        .put(&key, bytes, &metadata)
        .await
        .expect("replay");
    assert_eq!(outcome, PutOutcome::Replayed);
    assert_eq!(
        harness.store.head(&key).await.expect("head"),
        Some(metadata)
    );
}

#[tokio::test]
async fn keys_escaping_the_root_are_rejected() {
    let (_dir, store) = filesystem_store();
    for key in ["../outside.pdf", "/etc/passwd", "", "captures/x.pdf.meta.json"] {
        assert!(matches!(
            store.absolute_path(key),
            Err(ObjectStoreError::InvalidKey { .. })
        ));
    }
}
