//! `HandoffServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use handoff_broker::{
    AgentEndpoint, BrokerError, BrokerStats, CloseReason, CustomerEndpoint, QueueEntry,
    SessionBroker,
};
use handoff_core::{ConnectionId, SessionId};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthCounters, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::endpoint::SessionEndpoint;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hand-off broker.
    pub broker: Arc<SessionBroker>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The hand-off server.
pub struct HandoffServer {
    config: Arc<ServerConfig>,
    broker: Arc<SessionBroker>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: PrometheusHandle,
}

impl HandoffServer {
    /// Create a server with a fresh broker.
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        let broker = Arc::new(SessionBroker::new(config.broker.clone()));
        Self {
            config: Arc::new(config),
            broker,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            broker: Arc::clone(&self.broker),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/api/health", get(health_handler))
            .route("/api/agent/stats", get(stats_handler))
            .route("/api/agent/queue", get(queue_handler))
            .route("/api/agent/sessions/{id}/close", post(close_handler))
            .route("/api/agent/ws/agent", get(agent_ws_handler))
            .route("/api/agent/ws/customer", get(customer_ws_handler))
            .route("/metrics", get(metrics_handler))
            .layer(cors_layer(&self.config.cors_origins))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind, start the transport worker, and serve until shutdown.
    ///
    /// Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        if let Some(worker) = self.broker.spawn_transport_worker(self.shutdown.token()) {
            self.shutdown.track(worker);
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, environment = %self.config.environment, "handoff server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "server stopped with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Notify connected clients and stop every tracked task.
    pub async fn stop(&self) {
        info!("shutting down");
        self.broker.shutdown();
        self.shutdown.graceful_shutdown(None).await;
    }

    /// The broker.
    pub fn broker(&self) -> &Arc<SessionBroker> {
        &self.broker
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Response body for `GET /`.
#[derive(Debug, Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
    environment: String,
}

/// Response body for `GET /api/agent/queue`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueResponse {
    entries: Vec<QueueEntry>,
    queue_size: usize,
}

/// GET /
async fn root_handler(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        name: "handoff",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.environment.clone(),
    })
}

/// GET /health, GET /api/health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.broker.stats();
    let counters = HealthCounters {
        connections: stats.customer_connections + stats.agent_connections,
        waiting: stats.queue_size,
        active: stats.active_sessions,
    };
    Json(health::health_check(
        state.start_time,
        counters,
        &state.config.environment,
    ))
}

/// GET /api/agent/stats
async fn stats_handler(State(state): State<AppState>) -> Json<BrokerStats> {
    Json(state.broker.stats())
}

/// GET /api/agent/queue
async fn queue_handler(State(state): State<AppState>) -> Json<QueueResponse> {
    let entries = state.broker.waiting_snapshot();
    Json(QueueResponse {
        queue_size: entries.len(),
        entries,
    })
}

/// POST /api/agent/sessions/{id}/close
async fn close_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let session_id = SessionId::from(id);
    match state
        .broker
        .close_session(&session_id, CloseReason::ClosedByOperator)
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let status = match err {
                BrokerError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
                _ => StatusCode::CONFLICT,
            };
            let body = json!({"code": err.code(), "message": err.to_string()});
            (status, Json(body)).into_response()
        }
    }
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(&state.metrics),
    )
}

/// GET /api/agent/ws/agent
async fn agent_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade::<AgentEndpoint>(ws, state)
}

/// GET /api/agent/ws/customer
async fn customer_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade::<CustomerEndpoint>(ws, state)
}

fn upgrade<E: SessionEndpoint>(ws: WebSocketUpgrade, state: AppState) -> Response {
    ws.max_message_size(state.config.max_frame_bytes)
        .on_upgrade(move |socket| {
            run_ws_session::<E>(
                socket,
                ConnectionId::new(),
                state.broker,
                state.config,
                state.shutdown.token(),
            )
        })
}
