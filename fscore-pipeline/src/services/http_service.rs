//! HTTP conversational scoring service
//!
//! Talks to a chat endpoint over two calls:
//! - `POST {base_url}/login` with `{"email", "password"}`, session cookies
//!   come back in `Set-Cookie`
//! - `POST {base_url}/conversation` with `{"inputs": prompt}` and the cookie
//!   jar, reply is either `{"text": "..."}` or plain text
//!
//! Requests are spaced by a minimum interval because the service is
//! rate-sensitive.

use crate::error::ServiceError;
use crate::session::{Credentials, ScoringService, Session};
use async_trait::async_trait;
use fscore_common::config::ServiceConfig;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

const USER_AGENT: &str = concat!("fscore/", env!("CARGO_PKG_VERSION"));

/// Rate limiter enforcing a minimum interval between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    /// Wait if necessary to comply with the interval
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ConversationRequest<'a> {
    inputs: &'a str,
}

/// reqwest-backed `ScoringService`
pub struct HttpScoringService {
    http_client: Client,
    base_url: String,
    rate_limiter: Arc<RateLimiter>,
}

impl HttpScoringService {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        min_request_interval: Duration,
    ) -> Result<Self, ServiceError> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Unreachable(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(RateLimiter::new(min_request_interval)),
        })
    }

    /// Build from the `[service]` TOML section
    ///
    /// # Errors
    /// `fscore_common::Error::Config` when `base_url` is not set.
    pub fn from_config(config: &ServiceConfig) -> fscore_common::Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                fscore_common::Error::Config(
                    "scoring service URL not configured (set [service] base_url)".to_string(),
                )
            })?;

        Self::new(
            base_url,
            Duration::from_secs(config.timeout_secs),
            Duration::from_millis(config.min_request_interval_ms),
        )
        .map_err(|e| fscore_common::Error::Config(e.to_string()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

/// `name=value` pairs from every `Set-Cookie` header
fn collect_cookies(response: &Response) -> BTreeMap<String, String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|header| {
            let pair = header.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Reply text: the `text` field of a JSON object, else the body verbatim
fn extract_reply_text(body: String) -> String {
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(serde_json::Value::Object(map)) => match map.get("text") {
            Some(serde_json::Value::String(text)) => text.clone(),
            _ => body,
        },
        _ => body,
    }
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    ServiceError::Unreachable(err.to_string())
}

#[async_trait]
impl ScoringService for HttpScoringService {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, ServiceError> {
        self.rate_limiter.wait().await;

        let url = self.endpoint("login");
        debug!(url = %url, account = %credentials.email, "Sending login request");

        let response = self
            .http_client
            .post(&url)
            .json(&LoginRequest {
                email: &credentials.email,
                password: &credentials.password,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api(status.as_u16(), body));
        }

        let cookies = collect_cookies(&response);
        if cookies.is_empty() {
            return Err(ServiceError::InvalidResponse(
                "login succeeded but no session cookie was set".to_string(),
            ));
        }

        Ok(Session::new(credentials.email.clone(), cookies))
    }

    async fn send(&self, session: &Session, prompt: &str) -> Result<String, ServiceError> {
        self.rate_limiter.wait().await;

        let url = self.endpoint("conversation");
        debug!(url = %url, prompt_chars = prompt.len(), "Sending scoring request");

        let response = self
            .http_client
            .post(&url)
            .header(COOKIE, session.cookie_header())
            .json(&ConversationRequest { inputs: prompt })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ServiceError::SessionExpired);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

        if !status.is_success() {
            return Err(ServiceError::Api(status.as_u16(), body));
        }

        let text = extract_reply_text(body);
        debug!(reply_chars = text.len(), "Received reply from scoring service");
        Ok(text)
    }
}
