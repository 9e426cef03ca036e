//! Envelope protocol exchanged with WebSocket clients.
//!
//! Both directions share one JSON shape:
//!
//! ```text
//! {"event": "subscribe", "status": "1000", "data": {...}, "channel": "order_update"}
//! ```
//!
//! - Client → Server events: `ping`, `subscribe`
//! - Server → Client events: `auth`, `pong`, `subscribe`, `update`, `error`

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Event names used on the wire.
pub mod events {
    pub const AUTH: &str = "auth";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const UPDATE: &str = "update";
    pub const ERROR: &str = "error";
}

/// Status codes carried in the `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Request handled.
    Ok,
    /// Frame was not a valid envelope.
    BadFormat,
    /// Missing or unknown channel.
    ChannelError,
    /// Event name not recognized.
    UnknownEvent,
}

impl StatusCode {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "1000",
            StatusCode::BadFormat => "1001",
            StatusCode::ChannelError => "1002",
            StatusCode::UnknownEvent => "1003",
        }
    }
}

/// The wire-level unit exchanged with clients in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,

    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub data: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl Envelope {
    /// Success envelope for `event` carrying `data`.
    pub fn success(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            status: StatusCode::Ok.as_str().to_string(),
            data,
            channel: None,
        }
    }

    /// Error envelope; `data` is `{"error": message}`.
    pub fn error(event: impl Into<String>, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            status: status.as_str().to_string(),
            data: json!({ "error": message.into() }),
            channel: None,
        }
    }

    /// Attaches the channel name the envelope refers to.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Returns true when the status is the success code.
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::Ok.as_str()
    }

    /// Serializes the envelope to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A client frame after parsing and classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Heartbeat request.
    Ping,
    /// Subscribe request; the channel may be missing.
    Subscribe { channel: Option<String> },
    /// Any other event name.
    Unknown(String),
}

impl ClientCommand {
    /// Parses a text frame into a command.
    ///
    /// An empty `channel` string is treated the same as a missing one.
    pub fn parse(text: &str) -> Result<Self, ClientError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| ClientError::MalformedMessage(e.to_string()))?;

        Ok(match envelope.event.as_str() {
            events::PING => ClientCommand::Ping,
            events::SUBSCRIBE => ClientCommand::Subscribe {
                channel: envelope.channel.filter(|c| !c.is_empty()),
            },
            other => ClientCommand::Unknown(other.to_string()),
        })
    }
}

/// Recoverable protocol errors; each one is answered with an error envelope
/// and the session stays active.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("Invalid message format")]
    MalformedMessage(String),

    #[error("Channel name is required")]
    MissingChannel,

    #[error("invalid channel name: {0}")]
    UnknownChannel(String),

    #[error("Unknown event type")]
    UnknownEvent(String),
}

impl ClientError {
    /// Status code reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            ClientError::MalformedMessage(_) => StatusCode::BadFormat,
            ClientError::MissingChannel | ClientError::UnknownChannel(_) => {
                StatusCode::ChannelError
            }
            ClientError::UnknownEvent(_) => StatusCode::UnknownEvent,
        }
    }

    /// Builds the error envelope answering this error.
    pub fn to_envelope(&self) -> Envelope {
        let event = match self {
            ClientError::MissingChannel | ClientError::UnknownChannel(_) => events::SUBSCRIBE,
            ClientError::MalformedMessage(_) | ClientError::UnknownEvent(_) => events::ERROR,
        };
        Envelope::error(event, self.status(), self.to_string())
    }
}
