//! Client socket plumbing.
//!
//! [`WsSocket`] is the production [`ClientSocket`]: the sink half of an axum
//! `WebSocket` behind one async mutex, so the session task and the channel
//! broadcasters never interleave frames on the same connection.
//!
//! [`SocketHandle`] is what the registry stores. It pairs the socket with an
//! eviction signal the broadcaster raises after removing a dead connection.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::{watch, Mutex};

use crate::ports::{ClientSocket, SocketError};

/// Write half of an axum WebSocket.
pub struct WsSocket {
    sink: Mutex<Option<SplitSink<WebSocket, Message>>>,
}

impl WsSocket {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
        }
    }
}

#[async_trait]
impl ClientSocket for WsSocket {
    async fn send_text(&self, text: &str) -> Result<(), SocketError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(SocketError::Closed)?;

        sink.send(Message::Text(text.to_string()))
            .await
            .map_err(|e| SocketError::Write(e.to_string()))
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), SocketError> {
        let mut guard = self.sink.lock().await;
        let Some(mut sink) = guard.take() else {
            return Ok(());
        };

        let frame = CloseFrame {
            code,
            reason: Cow::Owned(reason.to_string()),
        };
        let sent = sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| SocketError::Write(e.to_string()));
        let _ = sink.close().await;
        sent
    }
}

/// Shared handle to one client connection.
#[derive(Clone)]
pub struct SocketHandle {
    socket: Arc<dyn ClientSocket>,
    eviction: Arc<watch::Sender<bool>>,
}

impl SocketHandle {
    pub fn new(socket: Arc<dyn ClientSocket>) -> Self {
        let (eviction, _) = watch::channel(false);
        Self {
            socket,
            eviction: Arc::new(eviction),
        }
    }

    pub async fn send_text(&self, text: &str) -> Result<(), SocketError> {
        self.socket.send_text(text).await
    }

    pub async fn close(&self, code: u16, reason: &str) -> Result<(), SocketError> {
        self.socket.close(code, reason).await
    }

    /// Tells the owning session its connection was dropped from the registry.
    pub fn evict(&self) {
        self.eviction.send_replace(true);
    }

    pub fn is_evicted(&self) -> bool {
        *self.eviction.borrow()
    }

    /// Receiver that changes to `true` once [`SocketHandle::evict`] is called.
    pub fn eviction_signal(&self) -> watch::Receiver<bool> {
        self.eviction.subscribe()
    }
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle")
            .field("evicted", &self.is_evicted())
            .finish_non_exhaustive()
    }
}
