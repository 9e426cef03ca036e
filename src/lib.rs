//! Channel Gateway - real-time bridge from a topic message broker to
//! authenticated WebSocket clients.
//!
//! Clients connect with a bearer token, subscribe to a named channel and
//! receive every broker message routed to that channel's queue.

pub mod adapters;
pub mod app;
pub mod config;
pub mod domain;
pub mod ports;

pub use app::{AppError, GatewayApp, GatewayParts};
