//! Session Manager
//!
//! Owns the single authenticated session to the scoring service for a run.
//!
//! # Lifecycle
//! `Unauthenticated → Authenticated → (Expired | Revoked)`
//!
//! - `acquire` is idempotent once authenticated: later calls with the same
//!   credentials return the cached session. Different credentials (a new
//!   password included) replace it.
//! - A cookie jar from an earlier run is restored from the cookie cache when
//!   present, skipping login entirely.
//! - Otherwise login is attempted up to `RetryPolicy::max_attempts` times
//!   with a fixed delay between attempts.
//! - Cookie persistence is best-effort; a failed write only logs a warning.
//!
//! The service itself is injected as `Arc<dyn ScoringService>` so tests drive
//! the pipeline with a fake.

use crate::error::{AuthenticationError, ServiceError};
use crate::utils::{retry_fixed, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Login credentials for the scoring service
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authenticated handle to the scoring service
///
/// Read-only once created. Cookie values never appear in `Debug` output.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Account the session was opened for
    pub account: String,
    /// Cookie jar returned by the login endpoint
    pub cookies: BTreeMap<String, String>,
    pub established_at: DateTime<Utc>,
}

impl Session {
    pub fn new(account: impl Into<String>, cookies: BTreeMap<String, String>) -> Self {
        Self {
            account: account.into(),
            cookies,
            established_at: Utc::now(),
        }
    }

    /// `Cookie` request header value (`name=value; name2=value2`)
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account)
            .field("cookies", &self.cookies.keys().collect::<Vec<_>>())
            .field("established_at", &self.established_at)
            .finish()
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Expired,
    Revoked,
}

/// Where the live session came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Login,
    CookieCache,
}

/// External conversational scoring service
///
/// Both calls are untyped remote operations: the reply to `send` is free text
/// with no schema guarantee.
#[async_trait]
pub trait ScoringService: Send + Sync {
    /// Service name for logging
    fn name(&self) -> &'static str;

    /// Log in and return a fresh session
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, ServiceError>;

    /// Submit `prompt` and return the reply text verbatim
    async fn send(&self, session: &Session, prompt: &str) -> Result<String, ServiceError>;
}

/// On-disk cookie jars, one JSON file per account
#[derive(Debug, Clone)]
pub struct CookieCache {
    dir: PathBuf,
}

impl CookieCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file for `account`, with path-unsafe characters replaced
    pub fn path_for(&self, account: &str) -> PathBuf {
        let sanitized: String = account
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", sanitized))
    }

    /// Restore a cached session, `None` if absent or unreadable
    pub fn load(&self, account: &str) -> Option<Session> {
        let path = self.path_for(account);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cookie cache unreadable, ignoring");
                return None;
            }
        };

        match serde_json::from_str::<Session>(&content) {
            Ok(session) if session.account == account && !session.cookies.is_empty() => {
                Some(session)
            }
            Ok(_) => {
                warn!(path = %path.display(), "Cookie cache does not match account, ignoring");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cookie cache corrupt, ignoring");
                None
            }
        }
    }

    /// Persist `session` (best-effort)
    pub fn store(&self, session: &Session) {
        let path = self.path_for(&session.account);
        let outcome = serde_json::to_vec_pretty(session)
            .map_err(fscore_common::Error::from)
            .and_then(|bytes| fscore_common::fs::write_atomic(&path, &bytes))
            .and_then(|_| fscore_common::fs::set_owner_only(&path));

        match outcome {
            Ok(()) => debug!(path = %path.display(), "Cookies cached"),
            Err(e) => warn!(path = %path.display(), error = %e, "Could not cache cookies (continuing)"),
        }
    }

    /// Drop the cached jar for `account` (best-effort)
    pub fn remove(&self, account: &str) {
        let path = self.path_for(account);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Could not remove cached cookies");
            }
        }
    }
}

/// Single owner of the live session
pub struct SessionManager {
    service: Arc<dyn ScoringService>,
    policy: RetryPolicy,
    cookie_cache: Option<CookieCache>,
    session: Option<Session>,
    /// Credentials the live session was opened with
    credentials: Option<Credentials>,
    origin: Option<SessionOrigin>,
    state: SessionState,
}

impl SessionManager {
    pub fn new(service: Arc<dyn ScoringService>, policy: RetryPolicy) -> Self {
        Self {
            service,
            policy,
            cookie_cache: None,
            session: None,
            credentials: None,
            origin: None,
            state: SessionState::Unauthenticated,
        }
    }

    /// Persist and restore cookie jars under `dir`
    pub fn with_cookie_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cookie_cache = Some(CookieCache::new(dir));
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn origin(&self) -> Option<SessionOrigin> {
        self.origin
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Return the live session, establishing one if needed
    ///
    /// # Errors
    /// `AuthenticationError` once every login attempt failed. No session is
    /// held afterwards.
    pub async fn acquire(&mut self, credentials: &Credentials) -> Result<&Session, AuthenticationError> {
        let reusable =
            self.session.is_some() && self.credentials.as_ref() == Some(credentials);

        if reusable {
            debug!(account = %credentials.email, "Reusing authenticated session");
        } else {
            if self.session.is_some() {
                info!("Credentials changed, replacing session");
                self.drop_session(SessionState::Revoked);
            }

            let (session, origin) = match self.establish(credentials).await {
                Ok(established) => established,
                Err(e) => {
                    self.state = SessionState::Unauthenticated;
                    return Err(e);
                }
            };

            info!(
                service = self.service.name(),
                account = %session.account,
                origin = ?origin,
                "Session established"
            );
            self.session = Some(session);
            self.credentials = Some(credentials.clone());
            self.origin = Some(origin);
            self.state = SessionState::Authenticated;
        }

        self.session.as_ref().ok_or_else(|| AuthenticationError {
            attempts: 0,
            last_error: "session unavailable after login".to_string(),
        })
    }

    async fn establish(
        &self,
        credentials: &Credentials,
    ) -> Result<(Session, SessionOrigin), AuthenticationError> {
        if let Some(cache) = &self.cookie_cache {
            if let Some(session) = cache.load(&credentials.email) {
                debug!(account = %credentials.email, "Restored session from cookie cache");
                return Ok((session, SessionOrigin::CookieCache));
            }
        }

        let service = Arc::clone(&self.service);
        let session = retry_fixed("login", &self.policy, |attempt| {
            let service = Arc::clone(&service);
            async move {
                debug!(attempt, account = %credentials.email, "Logging in to scoring service");
                service.authenticate(credentials).await
            }
        })
        .await
        .map_err(|exhausted| AuthenticationError {
            attempts: exhausted.attempts,
            last_error: exhausted.last_error.to_string(),
        })?;

        if let Some(cache) = &self.cookie_cache {
            cache.store(&session);
        }

        Ok((session, SessionOrigin::Login))
    }

    /// Drop the live session and its cached cookies
    ///
    /// `state` should be `Expired` or `Revoked`; the next `acquire` logs in again.
    pub fn invalidate(&mut self, state: SessionState) {
        if self.session.is_none() {
            return;
        }
        warn!(state = ?state, "Invalidating session");
        self.drop_session(state);
    }

    fn drop_session(&mut self, state: SessionState) {
        if let Some(session) = self.session.take() {
            if let Some(cache) = &self.cookie_cache {
                cache.remove(&session.account);
            }
        }
        self.credentials = None;
        self.origin = None;
        self.state = state;
    }

    /// Submit `prompt` through the live session
    pub async fn send(&self, prompt: &str) -> Result<String, ServiceError> {
        match (&self.session, self.state) {
            (Some(session), SessionState::Authenticated) => self.service.send(session, prompt).await,
            _ => Err(ServiceError::NotAuthenticated),
        }
    }
}
