//! HTTP Scoring Service Integration Tests
//!
//! Runs `HttpScoringService` against a local axum server that mimics the
//! login and conversation endpoints.

use axum::{
    http::{header::COOKIE, header::SET_COOKIE, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse},
    routing::post,
    Json, Router,
};
use fscore_pipeline::error::ServiceError;
use fscore_pipeline::services::HttpScoringService;
use fscore_pipeline::session::{Credentials, ScoringService, Session};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

const PASSWORD: &str = "correct horse";
const SESSION_COOKIE: &str = "hf-chat=abc123";

#[derive(Deserialize)]
struct Login {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct Conversation {
    inputs: String,
}

async fn login(Json(body): Json<Login>) -> impl IntoResponse {
    if body.password != PASSWORD || body.email.is_empty() {
        return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
    }
    (
        AppendHeaders([
            (SET_COOKIE, format!("{}; Path=/; HttpOnly", SESSION_COOKIE)),
            (SET_COOKIE, "theme=dark".to_string()),
        ]),
        Json(json!({"ok": true})),
    )
        .into_response()
}

fn has_session(headers: &HeaderMap) -> bool {
    headers
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split("; ").any(|pair| pair == SESSION_COOKIE))
}

async fn conversation_json(headers: HeaderMap, Json(body): Json<Conversation>) -> impl IntoResponse {
    if !has_session(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({"text": format!("echo: {}", body.inputs)})).into_response()
}

async fn conversation_plain(headers: HeaderMap, Json(body): Json<Conversation>) -> impl IntoResponse {
    if !has_session(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    format!("plain: {}", body.inputs).into_response()
}

async fn login_without_cookie() -> impl IntoResponse {
    Json(json!({"ok": true}))
}

async fn overloaded() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
}

/// Start the mock service, returning its base URL
async fn spawn_mock_service() -> String {
    let app = Router::new()
        .route("/chat/login", post(login))
        .route("/chat/conversation", post(conversation_json))
        .route("/plain/login", post(login))
        .route("/plain/conversation", post(conversation_plain))
        .route("/broken/login", post(login_without_cookie))
        .route("/broken/conversation", post(overloaded));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: String) -> HttpScoringService {
    HttpScoringService::new(base_url, Duration::from_secs(5), Duration::ZERO).unwrap()
}

fn credentials() -> Credentials {
    Credentials::new("ops@example.com", PASSWORD)
}

#[tokio::test]
async fn test_login_collects_cookies() {
    let base = spawn_mock_service().await;
    let service = client(format!("{}/chat", base));

    let session = service.authenticate(&credentials()).await.unwrap();

    assert_eq!(session.account, "ops@example.com");
    assert_eq!(session.cookies.get("hf-chat").map(String::as_str), Some("abc123"));
    assert_eq!(session.cookies.get("theme").map(String::as_str), Some("dark"));
}

#[tokio::test]
async fn test_login_rejected() {
    let base = spawn_mock_service().await;
    let service = client(format!("{}/chat", base));

    let err = service
        .authenticate(&Credentials::new("ops@example.com", "wrong"))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Rejected(_)), "{:?}", err);
}

#[tokio::test]
async fn test_login_without_cookie_is_invalid_response() {
    let base = spawn_mock_service().await;
    let service = client(format!("{}/broken", base));

    let err = service.authenticate(&credentials()).await.unwrap_err();

    assert!(matches!(err, ServiceError::InvalidResponse(_)), "{:?}", err);
}

#[tokio::test]
async fn test_send_returns_text_field() {
    let base = spawn_mock_service().await;
    let service = client(format!("{}/chat", base));
    let session = service.authenticate(&credentials()).await.unwrap();

    let reply = service.send(&session, "score these").await.unwrap();

    assert_eq!(reply, "echo: score these");
}

#[tokio::test]
async fn test_send_returns_plain_body_verbatim() {
    let base = spawn_mock_service().await;
    let service = client(format!("{}/plain", base));
    let session = service.authenticate(&credentials()).await.unwrap();

    let reply = service.send(&session, "score these").await.unwrap();

    assert_eq!(reply, "plain: score these");
}

#[tokio::test]
async fn test_send_with_stale_cookies_is_session_expired() {
    let base = spawn_mock_service().await;
    let service = client(format!("{}/chat", base));
    let mut cookies = BTreeMap::new();
    cookies.insert("hf-chat".to_string(), "revoked".to_string());
    let stale = Session::new("ops@example.com", cookies);

    let err = service.send(&stale, "score these").await.unwrap_err();

    assert_eq!(err, ServiceError::SessionExpired);
    assert!(err.is_session_stale());
}

#[tokio::test]
async fn test_send_server_error_is_api_error() {
    let base = spawn_mock_service().await;
    let service = client(format!("{}/broken", base));
    let mut cookies = BTreeMap::new();
    cookies.insert("hf-chat".to_string(), "abc123".to_string());
    let session = Session::new("ops@example.com", cookies);

    let err = service.send(&session, "score these").await.unwrap_err();

    assert_eq!(err, ServiceError::Api(503, "overloaded".to_string()));
}

#[tokio::test]
async fn test_unreachable_service() {
    // Reserve a port, then free it so nothing listens there
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let service = client(format!("http://{}", addr));
    let err = service.authenticate(&credentials()).await.unwrap_err();

    assert!(matches!(err, ServiceError::Unreachable(_)), "{:?}", err);
}
