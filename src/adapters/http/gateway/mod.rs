//! HTTP adapter for the operator endpoints: publish a test message and list
//! live connections.

mod dto;
mod handlers;
mod routes;

pub use dto::{ConnectionsResponse, ErrorResponse, PublishRequest, PublishResponse, UserConnectionsResponse};
pub use handlers::GatewayHandlers;
pub use routes::gateway_routes;
