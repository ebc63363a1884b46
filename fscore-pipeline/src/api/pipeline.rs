//! Pipeline control endpoints
//!
//! Runs are serialized through the session lock: a request arriving while a
//! run holds it gets 409 instead of queueing behind it.

use crate::pipeline::{Pipeline, PipelineConfig, PipelineState, RunReport};
use crate::scores::ScoreMapping;
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

/// Response of POST /pipeline/normalize
#[derive(Debug, Serialize)]
pub struct NormalizeResponse {
    /// Number of users in the mapping
    pub users: usize,
    pub scores: ScoreMapping,
}

fn build_pipeline(state: &AppState) -> Pipeline {
    Pipeline::new(
        state.paths.clone(),
        PipelineConfig::from_settings(&state.settings, state.credentials.clone()),
    )
    .with_state_sender(state.pipeline_state.clone())
}

fn busy() -> ApiError {
    ApiError::Conflict("a pipeline run is already in progress".to_string())
}

/// POST /pipeline/run
///
/// Full run: load, authenticate, score every batch, normalize.
///
/// **Response:** the run report (batches scored and failed, final mapping).
///
/// **Errors:**
/// - 409 Conflict: another run is active
/// - 502 Bad Gateway: login failed on every attempt, or every batch failed
/// - 500 Internal Server Error: storage or normalization failure
pub async fn run_pipeline(State(state): State<AppState>) -> ApiResult<Json<RunReport>> {
    let mut sessions = state.sessions.try_lock().map_err(|_| busy())?;
    info!("Pipeline run requested via API");

    let pipeline = build_pipeline(&state);
    match pipeline.run(&mut sessions).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            state.record_error(e.to_string()).await;
            Err(e.into())
        }
    }
}

/// POST /pipeline/normalize
///
/// Re-normalize the existing raw log without contacting the scoring service.
/// File reads and the atomic mapping write run on the blocking pool.
pub async fn normalize(State(state): State<AppState>) -> ApiResult<Json<NormalizeResponse>> {
    let _guard = state.sessions.try_lock().map_err(|_| busy())?;

    let outcome = tokio::task::spawn_blocking({
        let pipeline = build_pipeline(&state);
        move || pipeline.normalize()
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Normalization task join error: {}", e)))?;

    match outcome {
        Ok(scores) => Ok(Json(NormalizeResponse {
            users: scores.len(),
            scores,
        })),
        Err(e) => {
            state.record_error(e.to_string()).await;
            Err(e.into())
        }
    }
}

/// GET /pipeline/status
///
/// State of the current or most recent run.
pub async fn status(State(state): State<AppState>) -> Json<PipelineState> {
    Json(state.pipeline_state.borrow().clone())
}

/// Build pipeline routes
pub fn pipeline_routes() -> Router<AppState> {
    Router::new()
        .route("/pipeline/run", post(run_pipeline))
        .route("/pipeline/normalize", post(normalize))
        .route("/pipeline/status", get(status))
}
