//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the gateway core and the outside world. Adapters implement these ports.
//!
//! ## Client Ports
//!
//! - `SessionValidator` - Bearer token validation at upgrade time
//! - `ClientSocket` - Serialized write half of one client connection
//!
//! ## Broker Ports
//!
//! - `BrokerConnector` / `BrokerConnection` / `BrokerChannel` - Transport primitives
//! - `MessageHandler` - Callback for consumed messages

mod client_socket;
mod message_broker;
mod message_handler;
mod session_validator;

pub use client_socket::{ClientSocket, SocketError};
pub use message_broker::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerError, Delivery, DeliveryAcker,
    DeliveryStream, ExchangeKind,
};
pub use message_handler::{BrokerEnvelope, HandlerError, MessageHandler};
pub use session_validator::SessionValidator;
