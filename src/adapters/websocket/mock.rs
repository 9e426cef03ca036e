//! In-memory client socket for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::ports::{ClientSocket, SocketError};

/// Records every frame written to it. Can be told to fail writes.
#[derive(Debug, Default)]
pub struct RecordingSocket {
    sent: Mutex<Vec<String>>,
    close_frame: Mutex<Option<(u16, String)>>,
    fail_writes: AtomicBool,
}

impl RecordingSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// A socket whose writes always fail, like a peer that vanished.
    pub fn broken() -> Self {
        let socket = Self::default();
        socket.fail_writes.store(true, Ordering::SeqCst);
        socket
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    /// Text frames written so far.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Text frames parsed as JSON.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    /// Close code and reason, once closed.
    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.close_frame.lock().ok().and_then(|c| c.clone())
    }
}

#[async_trait]
impl ClientSocket for RecordingSocket {
    async fn send_text(&self, text: &str) -> Result<(), SocketError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SocketError::Write("broken pipe".to_string()));
        }
        if self.close_frame().is_some() {
            return Err(SocketError::Closed);
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(text.to_string());
        }
        Ok(())
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), SocketError> {
        if let Ok(mut frame) = self.close_frame.lock() {
            if frame.is_none() {
                *frame = Some((code, reason.to_string()));
            }
        }
        Ok(())
    }
}
