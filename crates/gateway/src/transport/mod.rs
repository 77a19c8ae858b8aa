// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface: the WebSocket upgrade endpoint and the health probe.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::session::run::{run_connection, WireFormat};
use crate::session::{RuntimeSettings, SessionRegistry};

/// Process-wide handles shared by every request.
pub struct GatewayState {
    pub registry: Arc<SessionRegistry>,
    pub settings: Arc<RuntimeSettings>,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
    pub auth_token: Option<String>,
}

/// Query parameters accepted on the WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Wire rendering: `json` (default) or `binary`.
    pub format: Option<String>,
    pub token: Option<String>,
}

/// `GET /ws`: upgrade and run the session until the socket closes.
pub async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if let Some(ref required) = state.auth_token {
        if query.token.as_deref() != Some(required.as_str()) {
            return axum::http::Response::builder()
                .status(401)
                .body(axum::body::Body::from("unauthorized"))
                .unwrap_or_default()
                .into_response();
        }
    }

    let format = match query.format.as_deref() {
        Some("binary") => WireFormat::Binary,
        _ => WireFormat::Json,
    };

    let registry = Arc::clone(&state.registry);
    let settings = Arc::clone(&state.settings);
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| run_connection(socket, format, registry, settings, shutdown))
        .into_response()
}

#[derive(Debug, Serialize)]
pub struct HealthReply {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub live_sessions: usize,
    pub retained_sessions: usize,
}

/// `GET /healthz`: liveness probe with session counts.
pub async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<HealthReply> {
    Json(HealthReply {
        status: "running",
        uptime_secs: state.started_at.elapsed().as_secs(),
        live_sessions: state.registry.live_count().await,
        retained_sessions: state.registry.total_count().await,
    })
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
