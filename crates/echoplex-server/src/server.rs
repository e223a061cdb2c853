//! `EchoplexServer`: axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use echoplex_core::handlers::{self, HandlerContext};
use echoplex_core::{ConnectionState, RelaySink, Route};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, error, info, info_span};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::adapter;
use crate::websocket::registry::{ConnectionRegistry, ConnectionTicket};

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handler context (relay, limits, shutdown-linked cancellation).
    pub ctx: HandlerContext,
    /// Live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// When the server started.
    pub start_time: Instant,
}

/// The echoplex server.
pub struct EchoplexServer {
    config: ServerConfig,
    relay: Arc<RelaySink>,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl EchoplexServer {
    /// Create a new server.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            relay: Arc::new(RelaySink::new(config.relay)),
            registry: Arc::new(ConnectionRegistry::new(config.max_connections)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            config,
        }
    }

    /// Build the axum router: one WebSocket route per [`Route`] plus `/health`.
    pub fn router(&self) -> Router {
        let ctx = HandlerContext {
            relay: Arc::clone(&self.relay),
            duplex_limit: self.config.duplex_limit,
            relay_close_after: self.config.relay_close_after,
            cancel: self.shutdown.token().child_token(),
        };
        let state = AppState {
            ctx,
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
        };

        let mut router = Router::new().route("/health", get(health_handler));
        for route in Route::ALL {
            router = router.route(
                route.path(),
                get(move |ws: WebSocketUpgrade, headers: HeaderMap, state: State<AppState>| {
                    ws_handler(route, ws, headers, state)
                }),
            );
        }
        router.with_state(state).layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// Returns the bound address (useful with port 0) and the serve task,
    /// which finishes once shutdown is initiated.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server stopped with error");
            }
        });

        info!(%addr, routes = Route::ALL.len(), "echoplex server listening");
        Ok((addr, handle))
    }

    /// Stop accepting, cancel live pipelines, and wait for connections to close.
    pub async fn shutdown_gracefully(&self, serve: JoinHandle<()>) {
        self.shutdown
            .graceful_shutdown(vec![serve], Some(self.config.shutdown_timeout()))
            .await;
        info!(connections = self.registry.connection_count(), "server stopped");
    }

    /// Get the relay sink.
    pub fn relay(&self) -> &Arc<RelaySink> {
        &self.relay
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.shutdown.is_shutting_down(),
        state.registry.connections(),
        state.ctx.relay.stats(),
    ))
}

/// GET on a WebSocket route: reserve a slot, then upgrade.
async fn ws_handler(
    route: Route,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let Some(ticket) = state.registry.try_reserve(route) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let headers = adapter::headers_from(&headers);
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| run_session(socket, ticket, route, headers, state))
}

/// Drive one upgraded connection through its route handler.
async fn run_session(
    socket: WebSocket,
    ticket: ConnectionTicket,
    route: Route,
    headers: echoplex_core::Headers,
    state: AppState,
) {
    let tracker = state.shutdown.tracker().clone();
    let span = info_span!("conn", conn_id = %ticket.id(), route = route.as_str());
    let session = async move {
        ticket.set_state(ConnectionState::Open);
        let mut conn = adapter::connection(socket, ticket.id().to_string(), headers);
        info!("connection open");

        // Outcome is logged by dispatch.
        let _ = handlers::dispatch(route, &mut conn, &state.ctx).await;

        ticket.set_state(ConnectionState::Closed);
        info!("connection closed");
    };

    // Tracked so shutdown can wait for the close frame to go out.
    tracker.track_future(session).instrument(span).await;
}
