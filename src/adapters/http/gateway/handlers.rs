//! HTTP handlers for the operator endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tokio_util::sync::CancellationToken;

use crate::adapters::broker::BrokerClient;
use crate::adapters::http::middleware::RequireAuth;
use crate::adapters::websocket::ConnectionRegistry;
use crate::ports::BrokerError;

use super::dto::{
    ConnectionsResponse, ErrorResponse, PublishRequest, PublishResponse, UserConnectionsResponse,
};

#[derive(Clone)]
pub struct GatewayHandlers {
    broker: Arc<BrokerClient>,
    registry: Arc<ConnectionRegistry>,
    /// Publishes fail fast once this fires.
    shutdown: CancellationToken,
}

impl GatewayHandlers {
    pub fn new(
        broker: Arc<BrokerClient>,
        registry: Arc<ConnectionRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            broker,
            registry,
            shutdown,
        }
    }
}

/// POST /api/publish - Publish a message to the exchange
pub async fn publish_message(
    State(handlers): State<GatewayHandlers>,
    RequireAuth(user): RequireAuth,
    Json(req): Json<PublishRequest>,
) -> Response {
    if req.routing_key.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request("routing_key is required")),
        )
            .into_response();
    }

    match handlers
        .broker
        .publish(&req.routing_key, &req.message, &handlers.shutdown)
        .await
    {
        Ok(()) => {
            tracing::info!(user_id = %user.id, routing_key = %req.routing_key, "Message published");
            (
                StatusCode::OK,
                Json(PublishResponse {
                    status: "message published successfully".to_string(),
                    routing_key: req.routing_key,
                }),
            )
                .into_response()
        }
        Err(e) => handle_broker_error(e),
    }
}

/// GET /api/connections - List registered connections
pub async fn list_connections(
    State(handlers): State<GatewayHandlers>,
    RequireAuth(_user): RequireAuth,
) -> Response {
    let mut users: Vec<UserConnectionsResponse> = handlers
        .registry
        .snapshot()
        .into_iter()
        .map(|(user_id, records)| UserConnectionsResponse {
            user_id: user_id.to_string(),
            connections: records.iter().map(|r| r.info()).collect(),
        })
        .collect();
    users.sort_by(|a, b| a.user_id.cmp(&b.user_id));

    let response = ConnectionsResponse {
        total_users: users.len(),
        total_connections: users.iter().map(|u| u.connections.len()).sum(),
        users,
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn handle_broker_error(error: BrokerError) -> Response {
    match error {
        BrokerError::NotConnected | BrokerError::Cancelled => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::unavailable(error.to_string())),
        )
            .into_response(),
        BrokerError::Serialization(msg) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request(msg)),
        )
            .into_response(),
        other => {
            tracing::error!(error = %other, "Failed to publish message");
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse::upstream("Failed to publish message")),
            )
                .into_response()
        }
    }
}
