use axum::{extract::State, Json};
use std::sync::Arc;

use crate::results::ResultsSnapshot;
use crate::AppState;

// ─── GET /api/results ────────────────────────────────────────────
/// Recently finished subtests plus running/finished counters.

pub async fn get_results(State(state): State<Arc<AppState>>) -> Json<ResultsSnapshot> {
    Json(state.results.snapshot())
}
