//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::SubscriberId;
use relay_core::upstream::UpstreamConnector;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::session_manager::SessionManager;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::BroadcastRelay;
use crate::websocket::dispatcher::ControlDispatcher;
use crate::websocket::registry::SubscriberRegistry;
use crate::websocket::session::{ConnectionContext, Heartbeat, run_subscriber};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Per-connection dependencies.
    pub connection: ConnectionContext,
    /// Upstream session owner.
    pub manager: SessionManager,
    /// Subscriber cap.
    pub max_connections: usize,
    /// Largest inbound frame.
    pub max_message_size: usize,
    /// Monotonic start time.
    pub start_time: Instant,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The comment relay server.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<SubscriberRegistry>,
    manager: SessionManager,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    started_at: DateTime<Utc>,
    metrics: PrometheusHandle,
}

impl RelayServer {
    /// Wire registry, relay, session manager and dispatcher around `connector`.
    pub fn new(
        config: ServerConfig,
        connector: Arc<dyn UpstreamConnector>,
        metrics: PrometheusHandle,
    ) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        let relay = Arc::new(BroadcastRelay::new(Arc::clone(&registry)));
        let manager = SessionManager::new(connector, relay, config.stop_timeout());
        Self {
            config,
            registry,
            manager,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            started_at: Utc::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let connection = ConnectionContext {
            registry: Arc::clone(&self.registry),
            dispatcher: ControlDispatcher::new(self.manager.clone()),
            shutdown: self.shutdown.token(),
            heartbeat: Heartbeat {
                interval: self.config.heartbeat_interval(),
                timeout: self.config.heartbeat_timeout(),
            },
            send_queue_capacity: self.config.send_queue_capacity,
        };
        let state = AppState {
            connection,
            manager: self.manager.clone(),
            max_connections: self.config.max_connections,
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
            started_at: self.started_at,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind and serve in a background task.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    /// The task ends after [`ShutdownCoordinator::shutdown`].
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let bind = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|source| ServerError::Bind { addr: bind, source })?;
        let addr = listener.local_addr()?;

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server terminated with error");
            }
            info!("server stopped");
        });

        info!(%addr, "comment relay listening");
        Ok((addr, handle))
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the subscriber registry.
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Get the session manager.
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// GET / and GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let subscribers = state.connection.registry.count();
    if subscribers >= state.max_connections {
        warn!(subscribers, max = state.max_connections, "subscriber limit reached, refusing upgrade");
        counter!(WS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "subscriber limit reached").into_response();
    }

    match ws {
        Ok(ws) => {
            let ctx = state.connection;
            ws.max_message_size(state.max_message_size)
                .on_upgrade(move |socket| run_subscriber(socket, SubscriberId::new(), ctx))
        }
        Err(rejection) => rejection.into_response(),
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.started_at,
        state.connection.registry.count(),
        state.manager.status(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}
