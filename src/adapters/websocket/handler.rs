//! WebSocket upgrade handler.
//!
//! Handles the HTTP → WebSocket upgrade and hands the socket to a
//! [`Session`]:
//! 1. Refuse new upgrades once shutdown has started
//! 2. Take the token from `?token=`, falling back to `Authorization: Bearer`
//! 3. Validate it; failures get a 401 JSON body and no socket
//! 4. Upgrade and run the session until disconnect

use std::sync::Arc;

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::adapters::http::middleware::{bearer_token, unauthorized};
use crate::domain::foundation::{AuthError, AuthenticatedUser};
use crate::ports::SessionValidator;

use super::session::{Session, SessionContext};
use super::socket::{SocketHandle, WsSocket};

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct WebSocketState {
    pub validator: Arc<dyn SessionValidator>,
    pub sessions: SessionContext,
    /// Fires when the gateway stops accepting upgrades.
    pub draining: CancellationToken,
    /// Tracks running sessions so shutdown can wait for them.
    pub tracker: TaskTracker,
}

impl WebSocketState {
    pub fn new(validator: Arc<dyn SessionValidator>, sessions: SessionContext) -> Self {
        Self {
            validator,
            sessions,
            draining: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Picks the token: a non-empty `token` query parameter wins over the header.
pub fn extract_token(query: &TokenQuery, headers: &HeaderMap) -> Option<String> {
    query
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(headers))
        .map(str::to_string)
}

async fn authenticate(
    validator: &dyn SessionValidator,
    query: &TokenQuery,
    headers: &HeaderMap,
) -> Result<AuthenticatedUser, AuthError> {
    let token = extract_token(query, headers).ok_or(AuthError::MissingToken)?;
    validator.validate(&token).await
}

/// Handle WebSocket upgrade requests.
///
/// Route: `GET {ws_path}?token=<jwt>`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    State(state): State<WebSocketState>,
) -> Response {
    if state.draining.is_cancelled() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "Server shutting down",
                "code": "SHUTTING_DOWN"
            })),
        )
            .into_response();
    }

    let user = match authenticate(state.validator.as_ref(), &query, &headers).await {
        Ok(user) => user,
        Err(e) => {
            tracing::info!(error = %e, "Rejected WebSocket upgrade");
            return unauthorized(&e);
        }
    };

    let tracker = state.tracker.clone();
    ws.on_upgrade(move |socket| tracker.track_future(handle_socket(socket, user, state.sessions)))
}

/// Run an established connection until it ends.
async fn handle_socket(socket: WebSocket, user: AuthenticatedUser, sessions: SessionContext) {
    let (sink, stream) = socket.split();
    let handle = SocketHandle::new(Arc::new(WsSocket::new(sink)));

    Session::new(sessions, user, handle).run(stream).await;
}

/// Create axum router for the WebSocket endpoint.
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .merge(websocket_router("/ws"))
///     .with_state(ws_state);
/// ```
pub fn websocket_router(path: &str) -> Router<WebSocketState> {
    Router::new().route(path, get(ws_handler))
}
