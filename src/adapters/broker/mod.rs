//! Message broker adapters.
//!
//! - [`client`] - `BrokerClient`: connect, publish, consume with ack, reconnect
//! - [`amqp`] - RabbitMQ transport via `lapin`
//! - [`in_memory`] - In-process topic broker for tests and local development

pub mod amqp;
pub mod client;
pub mod in_memory;

pub use amqp::AmqpConnector;
pub use client::{BrokerClient, BrokerSettings, ConsumerExit};
pub use in_memory::{InMemoryBroker, PublishedMessage, Settlement};
