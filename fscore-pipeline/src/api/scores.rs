//! Score Mapping query endpoint

use crate::scores::{validate_threshold, ScoreMapping};
use crate::{ApiError, ApiResult, AppState};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

/// Query parameters for GET /scores
#[derive(Debug, Deserialize)]
pub struct ScoresQuery {
    /// Minimum score (0-100), inclusive
    pub min_score: Option<String>,
}

/// GET /scores?min_score=N
///
/// **Response:** `{"user": score, ...}` for every user scoring at least N
/// (every user when `min_score` is absent).
///
/// **Errors:**
/// - 400 Bad Request: `min_score` not an integer in 0-100
/// - 500 Internal Server Error: score mapping unreadable
pub async fn get_scores(
    State(state): State<AppState>,
    Query(query): Query<ScoresQuery>,
) -> ApiResult<Json<ScoreMapping>> {
    let threshold = match query.min_score.as_deref() {
        None => 0,
        Some(raw) => {
            let parsed = raw.trim().parse::<i64>().map_err(|_| {
                ApiError::BadRequest(format!("min_score must be an integer, got {:?}", raw))
            })?;
            validate_threshold(parsed).map_err(|e| ApiError::BadRequest(e.to_string()))?
        }
    };

    let scores = ScoreMapping::load(&state.paths.scores)?;
    Ok(Json(scores.at_or_above(threshold)))
}

/// Build score routes
pub fn score_routes() -> Router<AppState> {
    Router::new().route("/scores", get(get_scores))
}
