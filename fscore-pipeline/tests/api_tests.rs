//! HTTP API Integration Tests
//!
//! Drives the router in-process with `tower::ServiceExt::oneshot`.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fscore_common::config::PipelineSettings;
use fscore_pipeline::error::ServiceError;
use fscore_pipeline::{build_router, AppState};
use helpers::{credentials, evidence_json, sessions, FakeScoringService, TestRoot};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app_state(root: &TestRoot, service: Arc<FakeScoringService>) -> AppState {
    let settings = PipelineSettings {
        batch_size: 2,
        ..Default::default()
    };
    AppState::new(root.paths(), settings, Some(credentials()), sessions(service))
}

async fn get(state: AppState, uri: &str) -> (StatusCode, Value) {
    send(state, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post(state: AppState, uri: &str) -> (StatusCode, Value) {
    send(
        state,
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health() {
    let root = TestRoot::new();
    let state = app_state(&root, FakeScoringService::new(Vec::new()));

    let (status, body) = get(state, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "fscore");
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_evidence_preserves_file_order() {
    let root = TestRoot::new();
    root.write_evidence(r#"{"zed": ["last alphabetically"], "amy": 3}"#);
    let state = app_state(&root, FakeScoringService::new(Vec::new()));

    let response = build_router(state)
        .oneshot(Request::builder().uri("/evidence").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.find("zed").unwrap() < text.find("amy").unwrap());
}

#[tokio::test]
async fn test_missing_evidence_is_storage_error() {
    let root = TestRoot::new();
    let state = app_state(&root, FakeScoringService::new(Vec::new()));

    let (status, body) = get(state, "/evidence").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "STORAGE_ERROR");
}

#[tokio::test]
async fn test_scores_filtered_by_threshold() {
    let root = TestRoot::new();
    std::fs::write(
        &root.paths().scores,
        r#"{"alice": 10, "bob": 90, "carol": 55}"#,
    )
    .unwrap();
    let state = app_state(&root, FakeScoringService::new(Vec::new()));

    let (status, body) = get(state.clone(), "/scores?min_score=55").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"bob": 90, "carol": 55}));

    let (status, body) = get(state, "/scores").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_object().unwrap().len(), 3);
}

#[tokio::test]
async fn test_scores_invalid_threshold() {
    let root = TestRoot::new();
    let state = app_state(&root, FakeScoringService::new(Vec::new()));

    for uri in ["/scores?min_score=101", "/scores?min_score=-1", "/scores?min_score=high"] {
        let (status, body) = get(state.clone(), uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }
}

#[tokio::test]
async fn test_run_pipeline() {
    let root = TestRoot::new();
    root.write_evidence(&evidence_json(3));
    let service = FakeScoringService::new(vec![
        Ok(r#"{"user1": 10, "user2": 20}"#.to_string()),
        Ok(r#"{"user3": 30}"#.to_string()),
    ]);
    let state = app_state(&root, service.clone());

    let (status, body) = post(state.clone(), "/pipeline/run").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_batches"], 2);
    assert_eq!(body["scored_batches"], 2);
    assert_eq!(body["scores"], json!({"user1": 10, "user2": 20, "user3": 30}));
    assert_eq!(body["state"]["phase"], "done");

    let (_, status_body) = get(state, "/pipeline/status").await;
    assert_eq!(status_body["phase"], "done");
}

#[tokio::test]
async fn test_run_reports_failed_batches() {
    let root = TestRoot::new();
    root.write_evidence(&evidence_json(4));
    let service = FakeScoringService::new(vec![
        Err(ServiceError::Api(503, "overloaded".to_string())),
        Ok(r#"{"user3": 30, "user4": 40}"#.to_string()),
    ]);
    let state = app_state(&root, service);

    let (status, body) = post(state, "/pipeline/run").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["failed_batches"][0]["batch_index"], 0);
    assert_eq!(body["failed_batches"][0]["users"], json!(["user1", "user2"]));
    assert_eq!(body["scores"], json!({"user3": 30, "user4": 40}));
}

#[tokio::test]
async fn test_run_with_every_batch_failing_keeps_scores() {
    let root = TestRoot::new();
    root.write_evidence(&evidence_json(4));
    std::fs::write(&root.paths().scores, r#"{"carol": 50}"#).unwrap();
    let service = FakeScoringService::new(vec![
        Err(ServiceError::Unreachable("connection refused".to_string())),
        Err(ServiceError::Unreachable("connection refused".to_string())),
    ]);
    let state = app_state(&root, service);

    let (status, body) = post(state.clone(), "/pipeline/run").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "TRANSPORT_ERROR");

    let (_, scores) = get(state.clone(), "/scores").await;
    assert_eq!(scores, json!({"carol": 50}));

    let (_, status_body) = get(state, "/pipeline/status").await;
    assert_eq!(status_body["phase"], "failed");
}

#[tokio::test]
async fn test_run_authentication_failure() {
    let root = TestRoot::new();
    root.write_evidence(&evidence_json(2));
    let service = FakeScoringService::rejecting();
    let state = app_state(&root, service.clone());

    let (status, body) = post(state.clone(), "/pipeline/run").await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "AUTHENTICATION_ERROR");
    assert_eq!(service.sends(), 0);

    let (_, health) = get(state.clone(), "/health").await;
    assert!(health["last_error"]
        .as_str()
        .unwrap()
        .contains("Authentication failed"));

    let (_, status_body) = get(state, "/pipeline/status").await;
    assert_eq!(status_body["phase"], "failed");
}

#[tokio::test]
async fn test_run_conflict_while_busy() {
    let root = TestRoot::new();
    root.write_evidence(&evidence_json(2));
    let service = FakeScoringService::new(Vec::new());
    let state = app_state(&root, service.clone());

    let _active_run = state.sessions.lock().await;

    let (status, body) = post(state.clone(), "/pipeline/run").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, _) = post(state.clone(), "/pipeline/normalize").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(service.sends(), 0);
}

#[tokio::test]
async fn test_normalize_endpoint() {
    let root = TestRoot::new();
    std::fs::write(&root.paths().raw_log, "```json\n{\"alice\": \"42\"}\n```").unwrap();
    let state = app_state(&root, FakeScoringService::new(Vec::new()));

    let (status, body) = post(state.clone(), "/pipeline/normalize").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"], 1);
    assert_eq!(body["scores"], json!({"alice": 42}));

    let (_, status_body) = get(state, "/pipeline/status").await;
    assert_eq!(status_body["phase"], "done");
    assert!(root.paths().scores.exists());
}

#[tokio::test]
async fn test_normalize_endpoint_reports_fragment() {
    let root = TestRoot::new();
    std::fs::write(&root.paths().raw_log, "alice:10 bob:ninety").unwrap();
    let state = app_state(&root, FakeScoringService::new(Vec::new()));

    let (status, body) = post(state, "/pipeline/normalize").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "NORMALIZATION_ERROR");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("alice:10 bob:ninety"));
}
