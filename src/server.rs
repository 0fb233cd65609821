use axum::{middleware as axum_mw, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::middleware::{admission, timing};
use crate::policy::{DOWNLOAD_URL_PATH, UPLOAD_URL_PATH};
use crate::AppState;

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    // ── Subtests, behind admission control ──────────────────────
    let subtests = Router::new()
        .route(DOWNLOAD_URL_PATH, get(handlers::subtest::download))
        .route(UPLOAD_URL_PATH, get(handlers::subtest::upload))
        .route_layer(axum_mw::from_fn_with_state(
            state.gate.clone(),
            admission::limit,
        ));

    Router::new()
        .merge(subtests)
        // ── Results ─────────────────────────────────────────────
        .route("/api/results", get(handlers::results::get_results))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}
