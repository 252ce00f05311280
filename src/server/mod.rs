//! Axum JSON surface over the tracking engine.
//!
//! Provides:
//!   GET  /health            → liveness probe
//!   GET  /track             → cached-or-fresh transfer summary
//!   GET  /cache-status      → snapshot cache freshness
//!   GET  /monitor/status    → monitor settings + baseline counts
//!   GET  /monitor/history   → recent notification dispatch attempts
//!   POST /monitor/toggle    → start/stop the polling monitor
//!   POST /monitor/settings  → partial settings update

use crate::monitor::{MonitorController, SettingsUpdate};
use crate::tracker::{SnapshotCache, TrackError, TransferView};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shared state for the routes.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<SnapshotCache>,
    pub controller: Arc<MonitorController>,
}

/// Build the Axum router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/track", get(track))
        .route("/cache-status", get(cache_status))
        .route("/monitor/status", get(monitor_status))
        .route("/monitor/history", get(monitor_history))
        .route("/monitor/toggle", post(monitor_toggle))
        .route("/monitor/settings", post(monitor_settings))
        .with_state(state)
}

/// Start the API server.
pub async fn serve(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = bind_addr, "api listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// --- Handlers ---

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "message": "transfer tracker is running"
    }))
}

#[derive(Serialize)]
struct TrackSummary {
    total_after_filter: usize,
    transfers_in: usize,
    transfers_out: usize,
}

#[derive(Serialize)]
struct TrackResponse {
    summary: TrackSummary,
    stale: bool,
    transfers_in: Vec<TransferView>,
    transfers_out: Vec<TransferView>,
}

async fn track(State(state): State<AppState>) -> impl IntoResponse {
    let source = state.controller.context().source.clone();
    match state.cache.get_or_refresh(source.as_ref()).await {
        Ok(read) => {
            let snapshot = read.snapshot;
            Json(TrackResponse {
                summary: TrackSummary {
                    total_after_filter: snapshot.total_after_filter,
                    transfers_in: snapshot.inbound.len(),
                    transfers_out: snapshot.outbound.len(),
                },
                stale: read.stale,
                transfers_in: snapshot.inbound.iter().map(TransferView::from).collect(),
                transfers_out: snapshot.outbound.iter().map(TransferView::from).collect(),
            })
            .into_response()
        }
        Err(TrackError::RateLimited) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "detail": "transfer feed rate limited and no cached data available yet"
            })),
        )
            .into_response(),
        Err(TrackError::Upstream(e)) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({ "detail": e.to_string() })),
        )
            .into_response(),
    }
}

async fn cache_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.status().await)
}

async fn monitor_status(State(state): State<AppState>) -> impl IntoResponse {
    let ctx = state.controller.context();
    let settings = ctx.settings.lock().await.clone();
    let counts = ctx.known.counts().await;
    let history = ctx.history.lock().await;

    Json(serde_json::json!({
        "enabled": settings.enabled,
        "running": state.controller.is_running().await,
        "check_interval_secs": settings.check_interval_secs,
        "min_amount_tao": settings.min_amount_tao,
        "test_mode": settings.test_mode,
        "last_check": counts.last_check.map(|t| t.to_rfc3339()),
        "known_transfers": {
            "inbound": counts.inbound,
            "outbound": counts.outbound,
        },
        "recent_notifications": history.len(),
        "last_notification": history.last(),
    }))
}

async fn monitor_history(State(state): State<AppState>) -> impl IntoResponse {
    let history = state.controller.context().history.lock().await;
    Json(serde_json::json!({
        "total": history.len(),
        "history": history.recent(),
    }))
}

async fn monitor_toggle(State(state): State<AppState>) -> impl IntoResponse {
    let enabled = state.controller.toggle().await;
    Json(serde_json::json!({ "enabled": enabled }))
}

async fn monitor_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> impl IntoResponse {
    let ctx = state.controller.context();
    let mut settings = ctx.settings.lock().await;
    settings.apply(update);
    Json(settings.clone())
}
