//! HTTP surface over the engine.
//!
//! Handlers only read atomically published engine state or delegate to an
//! engine operation; none of them waits on the poll loop.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use rackdash_config::{Config, save_config};
use rackdash_core::{AuthState, DeviceSort, Engine};

use crate::error::ServerError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    engine: Engine,
    config: Arc<Mutex<Config>>,
    /// Network id changes are written back here when set.
    config_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(engine: Engine, config: Config, config_path: Option<PathBuf>) -> Self {
        Self {
            engine,
            config: Arc::new(Mutex::new(config)),
            config_path,
        }
    }
}

/// Build the axum router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/devices", get(handle_devices))
        .route("/history", get(handle_history))
        .route("/dashboard", get(handle_dashboard))
        .route("/health", get(handle_health))
        .route("/version", get(handle_version))
        .route("/speedtest/start", post(handle_speedtest_start))
        .route("/speedtest/status", get(handle_speedtest_status))
        .route("/speedtest/reset", post(handle_speedtest_reset))
        .route("/admin/reauthorize", post(handle_reauthorize))
        .route("/admin/network-id", post(handle_network_id))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ── Telemetry ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct DevicesParams {
    sort: Option<DeviceSort>,
}

async fn handle_devices(
    State(state): State<AppState>,
    Query(params): Query<DevicesParams>,
) -> Json<Value> {
    let devices = state.engine.current_devices(params.sort.unwrap_or_default());
    Json(json!({
        "count": devices.len(),
        "devices": devices,
        "last_update": state.engine.last_updated(),
    }))
}

async fn handle_history(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "history": state.engine.history(),
        "distributions": state.engine.distributions(),
    }))
}

async fn handle_dashboard(State(state): State<AppState>) -> Json<Value> {
    let engine = &state.engine;
    let devices = engine.current_devices(DeviceSort::default());
    Json(json!({
        "network_id": engine.network_id(),
        "last_update": engine.last_updated(),
        "count": devices.len(),
        "devices": devices,
        "history": engine.history(),
        "distributions": engine.distributions(),
        "speedtest": engine.speedtest_status(),
        "auth": engine.auth_status(),
        "poll": engine.poll_status(),
    }))
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let auth = state.engine.auth_status();
    let poll = state.engine.poll_status();
    let healthy = auth.state == AuthState::Authenticated && poll.consecutive_failures == 0;
    Json(json!({
        "status": if healthy { "ok" } else { "degraded" },
        "timestamp": Utc::now(),
        "auth_state": auth.state,
        "token_stale": auth.stale,
        "last_poll": poll,
    }))
}

async fn handle_version() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Speed test ──────────────────────────────────────────────────────

async fn handle_speedtest_start(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServerError> {
    let run = state.engine.start_speedtest()?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

async fn handle_speedtest_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.speedtest_status())
}

async fn handle_speedtest_reset(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.reset_speedtest())
}

// ── Admin ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ReauthorizeRequest {
    identity: Option<String>,
    code: Option<String>,
}

/// `{code}` completes verification, `{identity}` starts it, an empty body
/// attempts a silent refresh.
async fn handle_reauthorize(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ServerError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        ReauthorizeRequest::default()
    } else {
        serde_json::from_slice::<ReauthorizeRequest>(&body)
            .map_err(|e| ServerError::BadRequest(format!("invalid request body: {e}")))?
    };

    match (request.code, request.identity) {
        (Some(code), _) => state.engine.complete_authentication(&code).await?,
        (None, Some(identity)) => state.engine.begin_authentication(&identity).await?,
        (None, None) => state.engine.reauthorize().await?,
    }
    Ok(Json(state.engine.auth_status()))
}

#[derive(Debug, Deserialize)]
struct NetworkIdRequest {
    network_id: String,
}

async fn handle_network_id(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ServerError> {
    let request: NetworkIdRequest = serde_json::from_slice(&body)
        .map_err(|e| ServerError::BadRequest(format!("invalid request body: {e}")))?;

    let mut config = state.config.lock().await;
    let mut updated = config.clone();
    updated.set_network_id(&request.network_id)?;
    if let Some(path) = &state.config_path {
        save_config(&updated, path)?;
    }
    let network_id = updated.selected()?.network_id.clone();
    state.engine.set_network_id(&network_id)?;
    *config = updated;
    drop(config);

    info!(network_id, "network id changed via admin endpoint");
    Ok(Json(json!({ "network_id": network_id })))
}
