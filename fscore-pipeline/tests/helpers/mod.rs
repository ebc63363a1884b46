//! Test Helper Utilities
//!
//! Shared fixtures for fscore-pipeline integration tests: a scripted
//! scoring service and a temporary root folder.

#![allow(dead_code)]

use async_trait::async_trait;
use fscore_common::config::{PipelineSettings, RootFolderInitializer};
use fscore_pipeline::error::ServiceError;
use fscore_pipeline::pipeline::{Pipeline, PipelineConfig, PipelinePaths};
use fscore_pipeline::session::{
    CookieCache, Credentials, ScoringService, Session, SessionManager,
};
use fscore_pipeline::utils::RetryPolicy;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Scoring service with scripted logins and replies
///
/// Login fails `failing_logins` times before succeeding, and fails again
/// once `login_limit` successful logins are used up. Each `send` pops the
/// next scripted reply; an exhausted script answers `{}`.
pub struct FakeScoringService {
    failing_logins: u32,
    login_limit: u32,
    replies: Mutex<VecDeque<Result<String, ServiceError>>>,
    prompts: Mutex<Vec<String>>,
    logins: AtomicU32,
    sends: AtomicU32,
}

impl FakeScoringService {
    pub fn new(replies: Vec<Result<String, ServiceError>>) -> Arc<Self> {
        Self::with_failing_logins(0, replies)
    }

    pub fn with_failing_logins(
        failing_logins: u32,
        replies: Vec<Result<String, ServiceError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            failing_logins,
            login_limit: u32::MAX,
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            logins: AtomicU32::new(0),
            sends: AtomicU32::new(0),
        })
    }

    /// Only the first `limit` logins succeed
    pub fn with_login_limit(limit: u32, replies: Vec<Result<String, ServiceError>>) -> Arc<Self> {
        let mut service = Self::with_failing_logins(0, replies);
        if let Some(inner) = Arc::get_mut(&mut service) {
            inner.login_limit = limit;
        }
        service
    }

    /// Login never succeeds
    pub fn rejecting() -> Arc<Self> {
        Self::with_failing_logins(u32::MAX, Vec::new())
    }

    pub fn logins(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScoringService for FakeScoringService {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, ServiceError> {
        let attempt = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failing_logins || attempt - self.failing_logins > self.login_limit {
            return Err(ServiceError::Rejected(format!("login attempt {} refused", attempt)));
        }
        let mut cookies = BTreeMap::new();
        cookies.insert("session".to_string(), format!("s{}", attempt));
        Ok(Session::new(credentials.email.clone(), cookies))
    }

    async fn send(&self, _session: &Session, prompt: &str) -> Result<String, ServiceError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("{}".to_string()))
    }
}

/// Temporary root folder with the standard layout
pub struct TestRoot {
    pub dir: TempDir,
    pub initializer: RootFolderInitializer,
}

impl TestRoot {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let initializer = RootFolderInitializer::new(dir.path().to_path_buf());
        initializer.ensure_directory_exists().unwrap();
        Self { dir, initializer }
    }

    pub fn paths(&self) -> PipelinePaths {
        PipelinePaths::from_root(&self.initializer)
    }

    pub fn write_evidence(&self, json: &str) {
        std::fs::write(self.initializer.evidence_path(), json).unwrap();
    }

    pub fn pipeline(&self, batch_size: usize) -> Pipeline {
        Pipeline::new(self.paths(), config(batch_size))
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("ops@example.com", "hunter2")
}

pub fn config(batch_size: usize) -> PipelineConfig {
    PipelineConfig::from_settings(&PipelineSettings::default(), Some(credentials()))
        .with_batch_size(batch_size)
}

/// Session manager without delays between login attempts
pub fn sessions(service: Arc<FakeScoringService>) -> SessionManager {
    SessionManager::new(service, RetryPolicy::new(5, Duration::ZERO))
}

/// Session manager with a cookie jar for `credentials()` already cached
/// under the root folder, as left behind by an earlier run
pub fn sessions_with_cached_cookies(
    service: Arc<FakeScoringService>,
    root: &TestRoot,
) -> SessionManager {
    let cookie_dir = root.initializer.cookie_dir();
    let mut cookies = BTreeMap::new();
    cookies.insert("session".to_string(), "from-last-week".to_string());
    CookieCache::new(&cookie_dir).store(&Session::new(credentials().email, cookies));
    sessions(service).with_cookie_cache(cookie_dir)
}

/// `{"user1": ["comment"], ...}` with `count` users
pub fn evidence_json(count: usize) -> String {
    let entries: Vec<String> = (1..=count)
        .map(|i| format!("\"user{}\": [\"comment from user {}\"]", i, i))
        .collect();
    format!("{{{}}}", entries.join(", "))
}
