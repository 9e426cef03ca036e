//! MessageHandler port - callback invoked for each consumed broker message.
//!
//! The broker client decodes the delivery body, hands the resulting
//! [`BrokerEnvelope`] to the handler, and settles the delivery according to
//! the returned [`HandlerError`] kind.

use async_trait::async_trait;
use serde_json::Value;

/// A decoded broker message.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerEnvelope {
    pub routing_key: String,
    /// Opaque JSON; the gateway never inspects it.
    pub payload: Value,
}

impl BrokerEnvelope {
    pub fn new(routing_key: impl Into<String>, payload: Value) -> Self {
        Self {
            routing_key: routing_key.into(),
            payload,
        }
    }
}

/// Handler outcome other than success.
///
/// | Variant | Settlement |
/// |---|---|
/// | `NoSubscribers` | ack |
/// | `Permanent` | nack, no requeue |
/// | `Transient` | nack with requeue, bounded by redelivery count |
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Nobody is subscribed; the message is dropped without retry.
    #[error("no subscribers for channel {channel}")]
    NoSubscribers { channel: String },

    #[error("permanent handler failure: {0}")]
    Permanent(String),

    #[error("transient handler failure: {0}")]
    Transient(String),
}

impl HandlerError {
    /// Returns true if redelivery could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

/// Processes messages consumed from one queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, envelope: BrokerEnvelope) -> Result<(), HandlerError>;

    /// Handler name for logging.
    fn name(&self) -> &str;
}
