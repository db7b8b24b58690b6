//! HTTP refresh surface for the dashboard.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::pipeline::Pipeline;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Limit used when a request does not pass `?limit=`.
    pub default_limit: usize,
    /// Larger limits are refused.
    pub max_limit: usize,
}

/// Build the Axum router with the health and refresh routes.
///
/// A refresh fetches mail and may set `\Seen`, so it is only reachable by POST.
/// Browser dashboards served from `localhost` may call the API cross-origin.
pub fn refresh_routes(pipeline: Arc<Pipeline>, config: &PipelineConfig) -> Router {
    let state = AppState {
        pipeline,
        default_limit: config.fetch_limit,
        max_limit: config.max_fetch_limit,
    };

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin, _request_head| {
            let origin = origin.to_str().unwrap_or("");
            origin.starts_with("http://localhost:") || origin.starts_with("http://127.0.0.1:")
        }))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/refresh", post(refresh))
        .layer(cors)
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "inbox-triage"
    }))
}

// ── Refresh ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RefreshParams {
    limit: Option<usize>,
}

/// Run one refresh. A mailbox failure is reported as 502, never as an empty snapshot.
async fn refresh(
    State(state): State<AppState>,
    Query(params): Query<RefreshParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(state.default_limit);
    if limit > state.max_limit {
        warn!(limit, max = state.max_limit, "Refresh limit rejected");
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("limit {limit} exceeds maximum {}", state.max_limit)
            })),
        );
    }
    info!(limit, "Refresh requested");

    match state.pipeline.run(limit).await {
        Ok(snapshot) => (StatusCode::OK, Json(serde_json::json!(snapshot))),
        Err(e) => {
            warn!(error = %e, "Refresh failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}
