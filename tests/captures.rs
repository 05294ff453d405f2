mod support;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use evidentia::application::captures::CaptureError;
use evidentia::application::idempotency::CaptureRequest;
use evidentia::application::renderer::RenderError;
use evidentia::application::repos::{RepoError, TimeRange};
use evidentia::domain::types::CaptureStatus;
use evidentia::infra::links::OBJECTS_ROUTE_PREFIX;

use support::{FlakyLedger, HarnessBuilder, OWNER, ScriptedRenderer, Step, request};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_triggers_share_one_capture() {
    let renderer = Arc::new(ScriptedRenderer::default());
    let harness = HarnessBuilder::default()
        .renderer(renderer.clone())
        .build();

    let triggers = (0..8).map(|_| {
        let captures = harness.captures.clone();
        tokio::spawn(async move {
            captures
                .trigger(request("https://example.com/pricing"))
                .await
        })
    });
    let outcomes: Vec<_> = join_all(triggers)
        .await
        .into_iter()
        .map(|joined| joined.expect("join").expect("trigger"))
        .collect();

    let ids: HashSet<_> = outcomes.iter().map(|outcome| outcome.record.id).collect();
    assert_eq!(ids.len(), 1);
    assert_eq!(outcomes.iter().filter(|outcome| outcome.admitted).count(), 1);

    let id = *ids.iter().next().expect("id");
    let settled = harness
        .captures
        .wait_for_terminal(id, WAIT)
        .await
        .expect("terminal");
    assert_eq!(settled.status, CaptureStatus::Succeeded);
    assert_eq!(renderer.calls(), 1);

    let page = harness
        .captures
        .list_by_owner(OWNER, TimeRange::default(), None, None)
        .await
        .expect("list");
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn explicit_request_ids_separate_captures_of_one_url() {
    let harness = HarnessBuilder::default().build();
    let url = "https://example.com/pricing";

    let first = harness
        .captures
        .capture_now(CaptureRequest {
            request_id: Some("run-1".to_string()),
            ..request(url)
        })
        .await
        .expect("first");
    let second = harness
        .captures
        .capture_now(CaptureRequest {
            request_id: Some("run-2".to_string()),
            ..request(url)
        })
        .await
        .expect("second");
    let replay = harness
        .captures
        .capture_now(CaptureRequest {
            request_id: Some("run-1".to_string()),
            ..request(url)
        })
        .await
        .expect("replay");

    assert!(first.admitted && second.admitted);
    assert_ne!(first.record.id, second.record.id);
    assert!(!replay.admitted);
    assert_eq!(replay.record.id, first.record.id);
}

#[tokio::test]
async fn failed_capture_releases_its_dedupe_key() {
    let renderer = Arc::new(ScriptedRenderer::new([Step::Fail(RenderError::Permanent(
        "page crashed".to_string(),
    ))]));
    let harness = HarnessBuilder::default().renderer(renderer).build();
    let url = "https://example.com/outage";

    let failed = harness
        .captures
        .capture_now(request(url))
        .await
        .expect("first run")
        .record;
    assert_eq!(failed.status, CaptureStatus::Failed);

    let retried = harness
        .captures
        .capture_now(request(url))
        .await
        .expect("second run");
    assert!(retried.admitted);
    assert_ne!(retried.record.id, failed.id);
    assert_eq!(retried.record.status, CaptureStatus::Succeeded);
    assert_eq!(retried.record.dedupe_key, failed.dedupe_key);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_admission() {
    let harness = HarnessBuilder::default().build();

    for bad in [
        request("ftp://example.com/file"),
        request("not a url"),
        CaptureRequest {
            format: Some("gif".to_string()),
            ..request("https://example.com/")
        },
        CaptureRequest {
            owner_id: "   ".to_string(),
            ..request("https://example.com/")
        },
    ] {
        let err = harness
            .captures
            .trigger(bad)
            .await
            .expect_err("rejected");
        assert!(matches!(err, CaptureError::Domain(_)), "got {err:?}");
    }

    let page = harness
        .captures
        .list_by_owner(OWNER, TimeRange::default(), None, None)
        .await
        .expect("list");
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn records_are_scoped_to_their_owner() {
    let harness = HarnessBuilder::default().build();
    let record = harness
        .captures
        .capture_now(request("https://example.com/"))
        .await
        .expect("capture")
        .record;

    assert!(harness.captures.get(OWNER, record.id).await.is_ok());
    assert!(matches!(
        harness.captures.get("tenant-b", record.id).await,
        Err(CaptureError::NotFound)
    ));
    assert!(matches!(
        harness.captures.verify("tenant-b", record.id).await,
        Err(CaptureError::NotFound)
    ));

    let digest = record.digest.as_ref().expect("digest").as_str().to_string();
    let mine = harness
        .captures
        .find_by_digest(OWNER, &digest)
        .await
        .expect("lookup");
    assert_eq!(mine.len(), 1);
    let theirs = harness
        .captures
        .find_by_digest("tenant-b", &digest)
        .await
        .expect("lookup");
    assert!(theirs.is_empty());
}

#[tokio::test]
async fn listing_pages_newest_first() {
    let harness = HarnessBuilder::default().build();
    let mut ids = Vec::new();
    for path in ["a", "b", "c"] {
        let outcome = harness
            .captures
            .capture_now(request(&format!("https://example.com/{path}")))
            .await
            .expect("capture");
        ids.push(outcome.record.id);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    ids.reverse();

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = harness
            .captures
            .list_by_owner(OWNER, TimeRange::default(), Some(2), cursor.as_deref())
            .await
            .expect("page");
        seen.extend(page.items.iter().map(|record| record.id));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    assert_eq!(seen, ids);

    let err = harness
        .captures
        .list_by_owner(OWNER, TimeRange::default(), Some(2), Some("%%%"))
        .await
        .expect_err("bad cursor");
    assert!(matches!(err, CaptureError::Pagination(_)));
}

#[tokio::test]
async fn download_link_requires_a_succeeded_capture() {
    let renderer = Arc::new(ScriptedRenderer::new([Step::Hang]));
    let harness = HarnessBuilder::default().renderer(renderer).build();

    let pending = harness
        .captures
        .trigger(request("https://example.com/slow"))
        .await
        .expect("trigger")
        .record;
    let err = harness
        .captures
        .resolve_download_location(OWNER, pending.id)
        .await
        .expect_err("not yet captured");
    assert!(matches!(err, CaptureError::NotCaptured { .. }));

    let ready = HarnessBuilder::default().build();
    let done = ready
        .captures
        .capture_now(request("https://example.com/fast"))
        .await
        .expect("capture")
        .record;
    let link = ready
        .captures
        .resolve_download_location(OWNER, done.id)
        .await
        .expect("link");
    assert!(link.url.starts_with(OBJECTS_ROUTE_PREFIX));
    assert!(link.url.contains("signature="));
    assert!(link.expires_at <= time::OffsetDateTime::now_utc() + time::Duration::minutes(15));
}

#[tokio::test]
async fn png_captures_use_png_artifacts() {
    let harness = HarnessBuilder::default().build();
    let record = harness
        .captures
        .capture_now(CaptureRequest {
            format: Some("png".to_string()),
            ..request("https://example.com/")
        })
        .await
        .expect("capture")
        .record;

    assert_eq!(record.status, CaptureStatus::Succeeded);
    let key = record.object_key.as_deref().expect("key");
    assert!(key.ends_with(".png"));
    let metadata = harness.store.head(key).await.expect("head").expect("meta");
    assert_eq!(metadata.content_type, "image/png");
}

#[tokio::test(start_paused = true)]
async fn unresponsive_ledger_reads_time_out() {
    let ledger = Arc::new(FlakyLedger::healthy());
    let harness = HarnessBuilder::default().ledger(ledger.clone()).build();
    let record = harness
        .captures
        .capture_now(request("https://example.com/refunds"))
        .await
        .expect("capture")
        .record;
    let digest = record.digest.clone().expect("digest");

    ledger.stall_reads();

    let timed_out = |result: Result<_, CaptureError>| {
        matches!(result, Err(CaptureError::Repo(RepoError::Timeout)))
    };
    assert!(timed_out(harness.captures.get(OWNER, record.id).await.map(|_| ())));
    assert!(timed_out(
        harness
            .captures
            .list_by_owner(OWNER, TimeRange::default(), None, None)
            .await
            .map(|_| ())
    ));
    assert!(timed_out(
        harness
            .captures
            .find_by_digest(OWNER, digest.as_str())
            .await
            .map(|_| ())
    ));
    assert!(timed_out(
        harness.captures.wait_for_terminal(record.id, WAIT).await.map(|_| ())
    ));
}
