//! HTTP adapters - operator REST endpoints and shared middleware.

pub mod gateway;
pub mod middleware;

pub use gateway::{gateway_routes, GatewayHandlers};
