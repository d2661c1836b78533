//! Axum router wiring for the ops listener.

use axum::{routing::get, Router};

use crate::{app_state::AppState, ops};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .route("/api/stats", get(ops::api_stats))
        .route("/api/decisions", get(ops::api_decisions))
        .with_state(state)
}
