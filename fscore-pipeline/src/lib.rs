//! fscore-pipeline library interface
//!
//! Batch-scores forum users: evidence store → batches → scoring service →
//! raw log → normalized user → score mapping. The `fscore` binary and the
//! HTTP API drive the same stages in-process.

pub mod api;
pub mod config;
pub mod error;
pub mod evidence;
pub mod normalizer;
pub mod partition;
pub mod pipeline;
pub mod raw_log;
pub mod scorer;
pub mod scores;
pub mod services;
pub mod session;
pub mod utils;

pub use crate::error::{ApiError, ApiResult, PipelineError, Result};

use crate::pipeline::{PipelinePaths, PipelineState};
use crate::session::{Credentials, SessionManager};
use axum::Router;
use chrono::{DateTime, Utc};
use fscore_common::config::PipelineSettings;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Files read and written by pipeline runs
    pub paths: PipelinePaths,
    pub settings: PipelineSettings,
    /// `None` until configured; runs over a non-empty store then fail
    pub credentials: Option<Credentials>,
    /// Single session owner; holding the lock means a run is active
    pub sessions: Arc<Mutex<SessionManager>>,
    /// State of the current or most recent run
    pub pipeline_state: Arc<watch::Sender<PipelineState>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        paths: PipelinePaths,
        settings: PipelineSettings,
        credentials: Option<Credentials>,
        sessions: SessionManager,
    ) -> Self {
        let (pipeline_state, _) = watch::channel(PipelineState::Idle);
        Self {
            paths,
            settings,
            credentials,
            sessions: Arc::new(Mutex::new(sessions)),
            pipeline_state: Arc::new(pipeline_state),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember `message` for `/health`
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::evidence_routes())
        .merge(api::pipeline_routes())
        .merge(api::score_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
