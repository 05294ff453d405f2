mod support;

use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use evidentia_api_types::{
    ApiErrorBody, CaptureListResponse, CaptureResponse, DownloadLinkResponse, HealthResponse,
    TriggerCaptureResponse, VerifyResponse,
};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

use evidentia::domain::digest::ContentDigest;
use evidentia::infra::http::api::handlers::DIGEST_HEADER;
use evidentia::infra::http::api::middleware::OWNER_HEADER;
use evidentia::infra::http::{ApiState, build_router};

use support::{Harness, HarnessBuilder, OWNER, signer};

fn app(harness: &Harness) -> Router {
    build_router(ApiState {
        captures: harness.captures.clone(),
        store: harness.store.clone(),
        signer: signer(),
        health_timeout: Duration::from_secs(1),
    })
}

fn get(uri: &str, owner: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(owner) = owner {
        builder = builder.header(OWNER_HEADER, owner);
    }
    builder.body(Body::empty()).expect("request")
}

fn post_capture(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/v1/captures")
        .header(OWNER_HEADER, OWNER)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

async fn captured(harness: &Harness, router: &Router, url: &str) -> CaptureResponse {
    let response = router
        .clone()
        .oneshot(post_capture(json!({ "target_url": url })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let trigger: TriggerCaptureResponse = read_json(response).await;
    harness
        .captures
        .wait_for_terminal(trigger.capture.id, Duration::from_secs(5))
        .await
        .expect("terminal");
    trigger.capture
}

#[tokio::test]
async fn health_reports_ok() {
    let harness = HarnessBuilder::default().build();
    let response = app(&harness)
        .oneshot(get("/health", None))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body: HealthResponse = read_json(response).await;
    assert_eq!(body.status, "ok");
}

#[tokio::test]
async fn capture_routes_require_an_owner() {
    let harness = HarnessBuilder::default().build();
    let response = app(&harness)
        .oneshot(get("/v1/captures", None))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: ApiErrorBody = read_json(response).await;
    assert_eq!(body.error.code, "unauthorized");
}

#[tokio::test]
async fn trigger_is_idempotent_and_capture_is_readable() {
    let harness = HarnessBuilder::default().build();
    let router = app(&harness);

    let first = captured(&harness, &router, "https://example.com/terms").await;

    let replay = router
        .clone()
        .oneshot(post_capture(json!({ "target_url": "https://example.com/terms#section-2" })))
        .await
        .expect("response");
    assert_eq!(replay.status(), StatusCode::OK);
    let replay: TriggerCaptureResponse = read_json(replay).await;
    assert!(!replay.admitted);
    assert_eq!(replay.capture.id, first.id);

    let response = router
        .clone()
        .oneshot(get(&format!("/v1/captures/{}", first.id), Some(OWNER)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let record: CaptureResponse = read_json(response).await;
    assert_eq!(record.status, "succeeded");
    assert_eq!(record.format, "pdf");
    assert!(record.digest.is_some());

    let other = router
        .clone()
        .oneshot(get(&format!("/v1/captures/{}", first.id), Some("tenant-b")))
        .await
        .expect("response");
    assert_eq!(other.status(), StatusCode::NOT_FOUND);

    let list = router
        .oneshot(get("/v1/captures?limit=10", Some(OWNER)))
        .await
        .expect("response");
    assert_eq!(list.status(), StatusCode::OK);
    let list: CaptureListResponse = read_json(list).await;
    assert_eq!(list.items.len(), 1);
    assert!(list.next_cursor.is_none());
}

#[tokio::test]
async fn invalid_trigger_bodies_are_rejected() {
    let harness = HarnessBuilder::default().build();
    let response = app(&harness)
        .oneshot(post_capture(json!({ "target_url": "file:///etc/passwd" })))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: ApiErrorBody = read_json(response).await;
    assert_eq!(body.error.code, "invalid_input");
    assert!(body.error.hint.is_some());
}

#[tokio::test]
async fn verify_reports_recorded_and_computed_digests() {
    let harness = HarnessBuilder::default().build();
    let router = app(&harness);
    let capture = captured(&harness, &router, "https://example.com/privacy").await;

    let response = router
        .oneshot(get(
            &format!("/v1/captures/{}/verify", capture.id),
            Some(OWNER),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let report: VerifyResponse = read_json(response).await;
    assert!(report.ok);
    assert_eq!(report.outcome, "verified");
    assert_eq!(report.recorded_digest, report.computed_digest);
}

#[tokio::test]
async fn signed_download_serves_stored_bytes() {
    let harness = HarnessBuilder::default().build();
    let router = app(&harness);
    let capture = captured(&harness, &router, "https://example.com/imprint").await;

    let response = router
        .clone()
        .oneshot(get(
            &format!("/v1/captures/{}/download", capture.id),
            Some(OWNER),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let link: DownloadLinkResponse = read_json(response).await;

    let object = router
        .clone()
        .oneshot(get(&link.url, None))
        .await
        .expect("response");
    assert_eq!(object.status(), StatusCode::OK);
    assert_eq!(
        object.headers().get(header::CONTENT_TYPE).expect("type"),
        "application/pdf"
    );
    let advertised = object
        .headers()
        .get(DIGEST_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .expect("digest header");
    let bytes = object
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    assert_eq!(ContentDigest::of(&bytes).as_str(), advertised);
    assert_eq!(capture_digest(&harness, capture.id).await, advertised);

    let forged = link.url.replace("signature=", "signature=00");
    let response = router
        .oneshot(get(&forged, None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

async fn capture_digest(harness: &Harness, id: Uuid) -> String {
    harness
        .captures
        .get(OWNER, id)
        .await
        .expect("record")
        .digest
        .expect("digest")
        .as_str()
        .to_string()
}

#[tokio::test]
async fn digest_lookup_validates_its_input() {
    let harness = HarnessBuilder::default().build();
    let router = app(&harness);
    let capture = captured(&harness, &router, "https://example.com/faq").await;
    let digest = capture_digest(&harness, capture.id).await;

    let response = router
        .clone()
        .oneshot(get(&format!("/v1/digests/{digest}/captures"), Some(OWNER)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let found: CaptureListResponse = read_json(response).await;
    assert_eq!(found.items.len(), 1);
    assert_eq!(found.items[0].id, capture.id);

    let response = router
        .oneshot(get("/v1/digests/not-a-digest/captures", Some(OWNER)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_capture_is_not_found() {
    let harness = HarnessBuilder::default().build();
    let response = app(&harness)
        .oneshot(get(
            &format!("/v1/captures/{}/download", Uuid::new_v4()),
            Some(OWNER),
        ))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: ApiErrorBody = read_json(response).await;
    assert_eq!(body.error.code, "not_found");
}
