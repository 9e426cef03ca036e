//! MessageBroker port - the transport underneath the broker client.
//!
//! Models the primitives the gateway needs from an AMQP 0.9.1 style broker:
//! a connection that opens logical channels, and channels that declare
//! topology, publish, and consume with explicit acknowledgement.
//!
//! The wire protocol stays behind this port. `adapters::broker::amqp` speaks
//! to RabbitMQ through `lapin`; `adapters::broker::in_memory` is a topic
//! broker used by tests and local development.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Errors raised by the broker client and its transports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),

    #[error("invalid broker configuration: {0}")]
    Config(String),

    /// Declaring or binding topology failed.
    #[error("broker topology error: {0}")]
    Topology(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("consume failed: {0}")]
    Consume(String),

    #[error("failed to encode message: {0}")]
    Serialization(String),

    /// No usable link; either never connected, closed, or mid-reconnect.
    #[error("broker not connected")]
    NotConnected,

    /// The caller's cancellation token fired before the operation ran.
    #[error("operation cancelled")]
    Cancelled,

    #[error("reconnect gave up after {attempts} attempts: {last}")]
    ReconnectExhausted { attempts: u32, last: String },
}

/// Exchange types understood by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeKind {
    #[default]
    Topic,
    Direct,
    Fanout,
    Headers,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Topic => "topic",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "topic" => Ok(ExchangeKind::Topic),
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "headers" => Ok(ExchangeKind::Headers),
            other => Err(BrokerError::Config(format!(
                "unsupported exchange type: {}",
                other
            ))),
        }
    }
}

/// Settles one delivery. Exactly one of `ack`/`nack` is called per delivery.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Negative acknowledgement; `requeue` puts the message back on the queue.
    async fn nack(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// A message received from a queue.
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
    /// How many times this message was delivered before. Zero on first delivery.
    pub redelivery_count: u32,
    pub acker: Box<dyn DeliveryAcker>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("body_len", &self.body.len())
            .field("redelivery_count", &self.redelivery_count)
            .finish()
    }
}

/// Stream of deliveries. Ends (or yields an error) when the channel closes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Dials broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

/// A transport connection to the broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError>;

    /// Closes the connection. Closing a closed connection is not an error.
    async fn close(&self) -> Result<(), BrokerError>;
}

/// A logical channel multiplexed over a connection.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares a durable exchange. Idempotent.
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError>;

    /// Declares a durable, non-exclusive queue. Idempotent.
    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str)
        -> Result<(), BrokerError>;

    /// Publishes `body`; `persistent` requests delivery mode 2.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        persistent: bool,
    ) -> Result<(), BrokerError>;

    /// Starts consuming `queue` with manual acknowledgement.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError>;

    /// Closes the channel. Closing a closed channel is not an error.
    async fn close(&self) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn BrokerChannel, _: &dyn BrokerConnection, _: &dyn BrokerConnector) {}

    #[test]
    fn exchange_kind_defaults_to_topic() {
        assert_eq!(ExchangeKind::default(), ExchangeKind::Topic);
        assert_eq!("".parse::<ExchangeKind>().unwrap(), ExchangeKind::Topic);
    }

    #[test]
    fn exchange_kind_parses_known_types() {
        assert_eq!("fanout".parse::<ExchangeKind>().unwrap(), ExchangeKind::Fanout);
        assert_eq!("direct".parse::<ExchangeKind>().unwrap().to_string(), "direct");
    }

    #[test]
    fn exchange_kind_rejects_unknown_types() {
        assert!(matches!(
            "x-delayed".parse::<ExchangeKind>(),
            Err(BrokerError::Config(_))
        ));
    }
}
