//! HTTP and websocket handlers for the Scribe server.
//!
//! Requests are authenticated and checked against the access policy before
//! a websocket is upgraded; after that the connection belongs to a session
//! and no further error reaches HTTP.

use crate::auth::{
    extract_token, AuthError, Authenticator, ConfigAccessPolicy, DocumentAccess, JwtAuthenticator,
};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use scribe_core::{ConnectionIdentity, DocumentId, Hub, InvalidDocumentId, UserInfo};
use scribe_transport::{serve, ContentHandler, LoggingContentHandler, PumpEnd, SessionConfig};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const DEVELOPMENT_SECRET: &str = "scribe-development-secret";
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// The presence hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
    pub session: SessionConfig,
    pub authenticator: Arc<dyn Authenticator>,
    pub access: Arc<dyn DocumentAccess>,
    pub content: Arc<dyn ContentHandler>,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, hub: Hub) -> Self {
        let secret = config.auth.jwt_secret.clone().unwrap_or_else(|| {
            warn!("auth.jwt_secret not set, using the development secret. This is insecure for production!");
            DEVELOPMENT_SECRET.to_string()
        });

        Self {
            hub,
            session: config.session_config(),
            authenticator: Arc::new(JwtAuthenticator::new(&secret)),
            access: Arc::new(ConfigAccessPolicy::new(&config.access)),
            content: Arc::new(LoggingContentHandler),
            config,
        }
    }
}

/// Request failures reported before a websocket is upgraded.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidDocument(#[from] InvalidDocumentId),

    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error("Access denied to this document")]
    Forbidden,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidDocument(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.websocket_route(), get(ws_handler))
        .route(&state.config.active_users_route(), get(active_users_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server until ctrl-c or SIGTERM.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let hub = Hub::start(config.hub_config());
    let state = Arc::new(AppState::new(config.clone(), hub.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        match metrics::start_metrics_server(config.metrics.port) {
            Ok(()) => {
                tokio::spawn(metrics::report_hub_stats(hub, STATS_INTERVAL));
            }
            Err(e) => error!("Failed to start metrics server: {}", e),
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Scribe server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.websocket_route());

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Scribe server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Shutdown signal received");
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Resolve who is asking for which document.
fn authorize(
    state: &AppState,
    raw_document_id: String,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> Result<(DocumentId, UserInfo), ApiError> {
    let document_id = DocumentId::parse(raw_document_id)?;
    let token = extract_token(query_token, headers)?;
    let user = state.authenticator.authenticate(&token)?;

    if !state.access.can_view(&user, &document_id) {
        debug!(user = %user.user_id, document = %document_id, "Access denied");
        return Err(ApiError::Forbidden);
    }
    Ok((document_id, user))
}

/// Users currently viewing a document.
async fn active_users_handler(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let (document_id, _) = authorize(&state, id, None, &headers)?;
    let users = state.hub.active_users(&document_id).await;

    Ok(Json(serde_json::json!({
        "document_id": document_id.as_str(),
        "users": users,
    })))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let (document_id, user) = match authorize(&state, id, query.token.as_deref(), &headers) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(error = %e, "WebSocket admission refused");
            metrics::record_rejection(e.status().as_u16());
            return e.into_response();
        }
    };

    let identity = ConnectionIdentity::new(document_id, user);
    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, identity, state))
}

/// Handle an upgraded WebSocket connection.
async fn handle_websocket(socket: WebSocket, identity: ConnectionIdentity, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    info!(
        connection = %identity.connection_id,
        user = %identity.user.username,
        document = %identity.document_id,
        "WebSocket connection established"
    );

    let connection_id = identity.connection_id.clone();
    let end = serve(
        socket,
        identity,
        state.hub.clone(),
        state.session.clone(),
        state.content.clone(),
    )
    .await;

    if let PumpEnd::Failed(e) = end {
        debug!(connection = %connection_id, error = %e, "WebSocket failed");
        metrics::record_error("websocket");
    }
}
