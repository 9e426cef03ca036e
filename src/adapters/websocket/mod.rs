//! WebSocket adapters for the real-time channel gateway.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Message Broker (topic exchange)                 │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     │ one queue per channel
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      ChannelBroadcaster                              │
//! │   - Consumes the channel's queue                                    │
//! │   - Wraps each payload in an "update" envelope                      │
//! │   - Writes to every subscribed connection                           │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     │ looks up subscribers
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      ConnectionRegistry                              │
//! │   user-1               user-2               user-3                   │
//! │   ├── conn-a (order)   └── conn-d (order)   └── conn-g (none)        │
//! │   └── conn-b (none)                                                  │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     ▲
//!                                     │ registers / subscribes
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │          ws_handler (upgrade + auth) → Session (receive loop)        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`registry`] - Per-user connection index with reverse lookup
//! - [`socket`] - Serialized writer plus eviction signal per connection
//! - [`session`] - Lifecycle and command dispatch of one connection
//! - [`broadcaster`] - Broker queue to socket fan-out
//! - [`handler`] - Axum upgrade handler

pub mod broadcaster;
pub mod handler;
pub mod mock;
pub mod registry;
pub mod session;
pub mod socket;

pub use broadcaster::ChannelBroadcaster;
pub use handler::{extract_token, websocket_router, ws_handler, TokenQuery, WebSocketState};
pub use mock::RecordingSocket;
pub use registry::{ConnectionInfo, ConnectionRecord, ConnectionRegistry, RegistryError};
pub use session::{Session, SessionContext};
pub use socket::{SocketHandle, WsSocket};
