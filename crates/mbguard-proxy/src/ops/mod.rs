//! Operational HTTP endpoints.
//!
//! - `/healthz`       : liveness
//! - `/readyz`        : readiness (503 when draining)
//! - `/metrics`       : Prometheus text format
//! - `/api/stats`     : aggregate counters as JSON
//! - `/api/decisions` : most recent decision records, newest first

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::app_state::AppState;

const DEFAULT_DECISION_LIMIT: usize = 50;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.is_draining() {
        (StatusCode::SERVICE_UNAVAILABLE, "draining")
    } else {
        (StatusCode::OK, "ready")
    }
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let extra = state.metrics_extra();
    let body = state.metrics().render(&extra);

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

pub async fn api_stats(State(state): State<AppState>) -> Response {
    let snapshot = state.metrics().snapshot(state.audit().dropped());
    Json(snapshot).into_response()
}

#[derive(Debug, Deserialize)]
pub struct DecisionsQuery {
    pub limit: Option<usize>,
}

pub async fn api_decisions(
    State(state): State<AppState>,
    Query(q): Query<DecisionsQuery>,
) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_DECISION_LIMIT);
    Json(state.audit().recent(limit)).into_response()
}
