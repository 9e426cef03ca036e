//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the gateway to external systems:
//! - `auth` - Bearer token validation
//! - `broker` - Topic message broker (AMQP and in-memory)
//! - `http` - Operator REST endpoints and auth middleware
//! - `websocket` - Client connections, registry and fan-out

pub mod auth;
pub mod broker;
pub mod http;
pub mod websocket;
