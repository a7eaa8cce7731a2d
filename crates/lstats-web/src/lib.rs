//! HTTP surface of the ingest service: the sweep trigger plus status.

use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use lstats_sync::{IngestScheduler, SchedulerState};
use serde::Serialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

pub const CRATE_NAME: &str = "lstats-web";

#[derive(Clone)]
pub struct AppState {
    pub scheduler: IngestScheduler,
}

impl AppState {
    pub fn new(scheduler: IngestScheduler) -> Self {
        Self { scheduler }
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    scheduler: SchedulerState,
    sweeping: bool,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/v1/update_matches", post(update_matches_handler))
        .route("/v1/sweeps/last", get(last_sweep_handler))
        .with_state(Arc::new(state))
}

/// Serves until `shutdown` resolves, then drains in-flight requests.
pub async fn serve(
    bind: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "http listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        scheduler: state.scheduler.state(),
        sweeping: state.scheduler.is_sweeping(),
    })
}

/// Fire and forget: answers before the sweep runs, and coalesces into a
/// sweep that is already in flight.
async fn update_matches_handler(State(state): State<Arc<AppState>>) -> Response {
    let outcome = state.scheduler.request_sweep();
    info!(?outcome, "sweep requested over http");
    (StatusCode::ACCEPTED, Json(json!({}))).into_response()
}

async fn last_sweep_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.scheduler.last_report().await {
        Some(report) => Json(report).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "no sweep has completed yet"})),
        )
            .into_response(),
    }
}
