//! HTTP DTOs for the operator endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::websocket::ConnectionInfo;

/// Request to publish a message through the broker.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishRequest {
    pub routing_key: String,
    pub message: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishResponse {
    pub status: String,
    pub routing_key: String,
}

/// Connections of one user.
#[derive(Debug, Clone, Serialize)]
pub struct UserConnectionsResponse {
    pub user_id: String,
    pub connections: Vec<ConnectionInfo>,
}

/// Registry listing.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionsResponse {
    pub total_users: usize,
    pub total_connections: usize,
    pub users: Vec<UserConnectionsResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            code: "SERVICE_UNAVAILABLE".to_string(),
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self {
            code: "BROKER_ERROR".to_string(),
            message: message.into(),
        }
    }
}
