//! HTTP surface and shared state for the Courier server.
//!
//! Three routes: the WebSocket upgrade, a health check, and the durable
//! notification pull. Authentication middleware for the pull route is an
//! external concern; the route trusts the identity in the path the same way
//! the original service trusts its auth middleware.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, Path as UrlPath, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use courier_core::fanout::FanoutRouter;
use courier_core::registry::ConnectionRegistry;
use courier_core::session::SessionManager;
use courier_core::traits::NotificationStore;
use courier_core::types::UserId;
use courier_store::{Database, SqliteBackend};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::connection;
use crate::metrics;
use crate::tasks;

/// Shared server state.
pub struct AppState {
    /// In-memory registry of live connections.
    pub registry: Arc<ConnectionRegistry>,
    /// The fanout decision engine.
    pub router: Arc<FanoutRouter>,
    /// Durable session bookkeeping.
    pub sessions: Arc<SessionManager>,
    /// Notification queue, for the pull route.
    pub notifications: Arc<dyn NotificationStore>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Wire the registry, router and session manager around one backend.
    #[must_use]
    pub fn new(config: Config, backend: SqliteBackend) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());

        let router = Arc::new(FanoutRouter::new(
            registry.clone(),
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            config.fanout_config(),
        ));

        let sessions = Arc::new(SessionManager::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
        ));

        Self {
            registry,
            router,
            sessions,
            notifications: Arc::new(backend),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or the server fails to
/// start.
pub async fn run_server(config: Config) -> Result<()> {
    let db = Database::open_at(Path::new(&config.database.path))?;
    let backend = SqliteBackend::new(db);
    let state = Arc::new(AppState::new(config.clone(), backend));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Periodic maintenance: expiry reaper + stale-connection reconciler
    tasks::spawn_maintenance(state.clone());

    // Build router
    let app = Router::new()
        .route(&config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/notifications/:user_id", get(pull_notifications))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Courier server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "users": stats.users,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::run_connection(socket, state))
}

/// Drain the durable notification queue for a user.
///
/// Read-and-acknowledge: the returned records are marked delivered in the
/// same store operation, so an immediate second pull returns an empty list.
async fn pull_notifications(
    UrlPath(user_id): UrlPath<UserId>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.notifications.pull_and_mark_delivered(user_id).await {
        Ok(pulled) => {
            metrics::record_notifications_pulled(pulled.len());
            Json(pulled).into_response()
        }
        Err(e) => {
            error!(user = %user_id, error = %e, "Notification pull failed");
            metrics::record_error("notification_pull");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
