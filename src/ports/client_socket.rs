//! ClientSocket port - the write half of one client connection.
//!
//! The session loop (replies) and the channel broadcaster (fan-out) both
//! write to the same connection from different tasks. Implementations must
//! serialize writes per connection: one frame is fully written before the
//! next one starts.

use async_trait::async_trait;

/// Errors writing to a client socket.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    /// The socket was already closed by this side.
    #[error("socket already closed")]
    Closed,

    /// The transport rejected the write.
    #[error("socket write failed: {0}")]
    Write(String),

    /// The peer stopped reading and the write missed its deadline.
    #[error("socket write timed out after {0:?}")]
    TimedOut(std::time::Duration),
}

/// Write half of a client connection.
#[async_trait]
pub trait ClientSocket: Send + Sync {
    /// Sends one text frame.
    async fn send_text(&self, text: &str) -> Result<(), SocketError>;

    /// Sends a close frame with `code` and `reason`; later writes fail with
    /// `SocketError::Closed`. Closing twice is a no-op.
    async fn close(&self, code: u16, reason: &str) -> Result<(), SocketError>;
}
