//! Evidence Store endpoint

use crate::evidence::EvidenceStore;
use crate::{ApiResult, AppState};
use axum::{extract::State, routing::get, Json, Router};

/// GET /evidence
///
/// The evidence store as a JSON object, in file order.
///
/// **Errors:** 500 if the store is missing or malformed.
pub async fn get_evidence(State(state): State<AppState>) -> ApiResult<Json<EvidenceStore>> {
    let store = EvidenceStore::load(&state.paths.evidence)?;
    Ok(Json(store))
}

/// Build evidence routes
pub fn evidence_routes() -> Router<AppState> {
    Router::new().route("/evidence", get(get_evidence))
}
