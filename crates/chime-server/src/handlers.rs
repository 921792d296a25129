//! HTTP and WebSocket handlers.
//!
//! The upgrade route authorizes the application key before the socket is
//! upgraded; after that the connection belongs to the core dispatcher.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chime_core::{Credential, CredentialCache, Dispatcher, ResolveError};
use chime_transport::websocket;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// Runs upgraded connections.
    pub dispatcher: Arc<Dispatcher>,
    /// Resolves application keys at the handshake.
    pub resolver: Arc<CredentialCache>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        resolver: Arc<CredentialCache>,
        config: Config,
    ) -> Self {
        Self {
            dispatcher,
            resolver,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/app/:key", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    let addr = state.config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Chime server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/app/{{key}}", addr);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Chime server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// HTTP status for a failed handshake.
#[must_use]
pub fn status_for(error: &ResolveError) -> StatusCode {
    match error {
        ResolveError::AppNotFound(_) => StatusCode::UNAUTHORIZED,
        ResolveError::Dependency(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.dispatcher.registry().stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connection_count,
        "channels": stats.channel_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(app_key): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let credential = match state.resolver.resolve(&app_key).await {
        Ok(credential) => credential,
        Err(e) => {
            let status = status_for(&e);
            if e.is_unauthorized() {
                metrics::record_rejected_handshake("unauthorized");
                debug!(app_key = %app_key, "Rejected unknown application key");
            } else {
                metrics::record_rejected_handshake("unavailable");
                warn!(app_key = %app_key, error = %e, "Credential lookup failed");
            }
            return (status, e.to_string()).into_response();
        }
    };

    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, credential, state))
}

/// Handle an upgraded WebSocket connection.
async fn handle_websocket(socket: WebSocket, credential: Credential, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let app_id = credential.app_id.clone();

    let (reader, writer) = websocket::split(socket);
    let id = state
        .dispatcher
        .on_upgrade_success(credential, reader, writer)
        .await;

    debug!(connection = %id, app_id = %app_id, "WebSocket disconnected");
}
