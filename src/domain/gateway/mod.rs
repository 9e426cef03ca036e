//! Gateway domain - channels, envelopes and the session lifecycle.
//!
//! Pure types with no I/O. The WebSocket and broker adapters build on them.

pub mod channel;
pub mod envelope;
pub mod session_state;
pub mod topic;

pub use channel::{ChannelBinding, ChannelCatalog};
pub use envelope::{events, ClientCommand, ClientError, Envelope, StatusCode};
pub use session_state::{close_code, CloseCause, SessionState};
pub use topic::RoutingPattern;
