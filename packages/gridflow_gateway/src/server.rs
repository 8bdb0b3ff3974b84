//! Shared application state and the HTTP surface.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::auth::{Authenticator, build_authenticator};
use crate::bus::{BusFilter, MessageBus, Topics};
use crate::config::{AuthConfig, BackendsConfig, BusConfig, FileConfig, ServerConfig};
use crate::metrics::{GatewayMetrics, HealthStatus};
use crate::ws::interceptor::{InterceptorChain, PayloadTrimInterceptor};
use crate::ws::registry::SessionRegistry;
use crate::ws::session::handle_session;

/// Everything a session or handler needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub bus: MessageBus,
    pub topics: Topics,
    pub filter: BusFilter,
    pub authenticator: Arc<dyn Authenticator>,
    pub interceptors: Arc<InterceptorChain>,
    pub metrics: Arc<GatewayMetrics>,
    pub server: ServerConfig,
    pub backends: BackendsConfig,
    pub anonymous_display_name: String,
}

impl AppState {
    pub fn from_config(file: &FileConfig) -> anyhow::Result<Self> {
        let auth = AuthConfig::from_file(file);
        let bus = BusConfig::from_file(file);
        let authenticator = build_authenticator(&auth)?;
        let topics = Topics::new(bus.topic_prefix.clone());
        let filter = BusFilter::new(topics.streams_events(), bus.excluded_suffixes.clone());

        let mut interceptors = InterceptorChain::new();
        if file.session.trim_command_payloads {
            interceptors.push(Arc::new(PayloadTrimInterceptor));
        }

        Ok(Self {
            registry: Arc::new(SessionRegistry::new()),
            bus: MessageBus::new(bus.capacity),
            topics,
            filter,
            authenticator,
            interceptors: Arc::new(interceptors),
            metrics: Arc::new(GatewayMetrics::new()),
            server: ServerConfig::from_file(file),
            backends: BackendsConfig::from_file(file),
            anonymous_display_name: auth.anonymous_display_name,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(health_live_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Multiplexed WebSocket endpoint - one connection per client session
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_session(socket, state, query.token))
}

/// Health check endpoint - returns gateway status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = state.metrics.snapshot();
    let status = if metrics.errors.websocket == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthStatus {
        status: status.to_string(),
        sessions: metrics.sessions,
        uptime_secs: metrics.uptime_secs,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Metrics endpoint - returns detailed gateway metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the gateway is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}
