//! Per-connection session.
//!
//! Runs one accepted, authenticated socket through its lifecycle:
//! register, welcome, receive loop, deregister and close. See
//! [`SessionState`] for the legal transitions.

use std::sync::Arc;

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::domain::foundation::{AuthenticatedUser, ConnectionId, StateMachine, Timestamp};
use crate::domain::gateway::{
    events, ChannelCatalog, ClientCommand, ClientError, CloseCause, Envelope, SessionState,
    StatusCode,
};

use super::registry::ConnectionRegistry;
use super::socket::SocketHandle;

/// Shared collaborators of every session.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub catalog: Arc<ChannelCatalog>,
    /// Fires when the process says goodbye to remaining clients.
    pub shutdown: CancellationToken,
}

impl SessionContext {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        catalog: Arc<ChannelCatalog>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            catalog,
            shutdown,
        }
    }
}

/// One client connection after its token was accepted.
pub struct Session {
    ctx: SessionContext,
    user: AuthenticatedUser,
    connection_id: ConnectionId,
    socket: SocketHandle,
    state: SessionState,
}

impl Session {
    /// Creates a session for a verified user; the state is `Authenticating`.
    pub fn new(ctx: SessionContext, user: AuthenticatedUser, socket: SocketHandle) -> Self {
        Self {
            ctx,
            user,
            connection_id: ConnectionId::new(),
            socket,
            state: SessionState::Authenticating,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn advance(&mut self, next: SessionState) {
        match self.state.transition_to(next) {
            Ok(state) => self.state = state,
            Err(e) => tracing::error!(
                connection_id = %self.connection_id,
                error = %e,
                "Illegal session transition"
            ),
        }
    }

    /// Drives the session until the connection ends; returns why it ended.
    pub async fn run<S>(mut self, mut incoming: S) -> CloseCause
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
    {
        if let Err(e) = self.ctx.registry.add(
            &self.user.id,
            self.connection_id,
            self.socket.clone(),
            true,
        ) {
            tracing::error!(user_id = %self.user.id, error = %e, "Registration failed");
            let cause = CloseCause::RegistrationFailed;
            self.send_close(cause).await;
            self.advance(SessionState::Closed);
            return cause;
        }
        self.advance(SessionState::Registered);

        tracing::info!(
            user_id = %self.user.id,
            username = %self.user.username,
            connection_id = %self.connection_id,
            "WebSocket connection established"
        );

        let cause = match self.send_welcome().await {
            Ok(()) => {
                self.advance(SessionState::Active);
                self.receive(&mut incoming).await
            }
            Err(reason) => {
                tracing::warn!(connection_id = %self.connection_id, error = %reason, "Failed to send welcome");
                CloseCause::WelcomeFailed
            }
        };

        self.advance(SessionState::Closing);
        self.close(cause).await;
        self.advance(SessionState::Closed);
        cause
    }

    async fn send_welcome(&self) -> Result<(), String> {
        let welcome = Envelope::success(
            events::AUTH,
            json!({
                "message": "success",
                "username": self.user.username,
                "connection_id": self.connection_id,
                "timestamp": Timestamp::now().as_unix_secs(),
            }),
        );
        let text = welcome.to_json().map_err(|e| e.to_string())?;
        self.socket.send_text(&text).await.map_err(|e| e.to_string())
    }

    async fn receive<S>(&self, incoming: &mut S) -> CloseCause
    where
        S: Stream<Item = Result<Message, axum::Error>> + Unpin + Send,
    {
        let mut evicted = self.socket.eviction_signal();
        if self.socket.is_evicted() {
            return CloseCause::Evicted;
        }

        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return CloseCause::Shutdown,
                changed = evicted.changed() => {
                    if changed.is_err() || *evicted.borrow() {
                        return CloseCause::Evicted;
                    }
                }
                frame = incoming.next() => match frame {
                    None | Some(Ok(Message::Close(_))) => return CloseCause::RemoteClosed,
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %self.connection_id, error = %e, "Receive error");
                        return CloseCause::ReadError;
                    }
                    Some(Ok(Message::Text(text))) => {
                        let reply = self.dispatch(&text);
                        self.reply(reply).await;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Answers one text frame.
    fn dispatch(&self, text: &str) -> Envelope {
        let command = match ClientCommand::parse(text) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!(connection_id = %self.connection_id, error = ?e, "Malformed message");
                return e.to_envelope();
            }
        };

        match command {
            ClientCommand::Ping => Envelope::success(
                events::PONG,
                json!({ "timestamp": Timestamp::now().as_unix_secs() }),
            ),
            ClientCommand::Subscribe { channel } => self.subscribe(channel.as_deref()),
            ClientCommand::Unknown(event) => {
                tracing::debug!(connection_id = %self.connection_id, event = %event, "Unknown event");
                ClientError::UnknownEvent(event).to_envelope()
            }
        }
    }

    fn subscribe(&self, requested: Option<&str>) -> Envelope {
        let binding = match self.ctx.catalog.resolve(requested) {
            Ok(binding) => binding,
            Err(e) => return e.to_envelope(),
        };
        let channel = binding.channel_name.as_str();

        if let Err(e) = self
            .ctx
            .registry
            .add_channel(&self.user.id, self.connection_id, channel)
        {
            return Envelope::error(events::SUBSCRIBE, StatusCode::ChannelError, e.to_string());
        }

        tracing::info!(
            user_id = %self.user.id,
            connection_id = %self.connection_id,
            channel,
            "Subscribed to channel"
        );

        Envelope::success(
            events::SUBSCRIBE,
            json!({
                "message": "Subscribed to channel successfully",
                "connection_id": self.connection_id,
                "channel": channel,
                "timestamp": Timestamp::now().as_unix_secs(),
            }),
        )
        .with_channel(channel)
    }

    async fn reply(&self, envelope: Envelope) {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(connection_id = %self.connection_id, error = %e, "Cannot serialize reply");
                return;
            }
        };
        if let Err(e) = self.socket.send_text(&text).await {
            tracing::debug!(connection_id = %self.connection_id, error = %e, "Failed to send reply");
        }
    }

    async fn send_close(&self, cause: CloseCause) {
        if let Err(e) = self.socket.close(cause.close_code(), cause.reason()).await {
            tracing::debug!(connection_id = %self.connection_id, error = %e, "Close frame not delivered");
        }
    }

    async fn close(&self, cause: CloseCause) {
        self.ctx
            .registry
            .remove_by_conn_id(&self.user.id, self.connection_id);

        self.send_close(cause).await;

        tracing::info!(
            user_id = %self.user.id,
            connection_id = %self.connection_id,
            cause = ?cause,
            "WebSocket connection closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::websocket::RecordingSocket;
    use crate::domain::foundation::UserId;
    use crate::domain::gateway::ChannelBinding;
    use futures::channel::mpsc;
    use serde_json::Value;

    fn context() -> SessionContext {
        SessionContext::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(ChannelCatalog::new(vec![ChannelBinding::order_update()]).unwrap()),
            CancellationToken::new(),
        )
    }

    fn user() -> AuthenticatedUser {
        AuthenticatedUser::new(UserId::new("user123").unwrap(), "admin")
    }

    fn text(value: Value) -> Result<Message, axum::Error> {
        Ok(Message::Text(value.to_string()))
    }

    async fn run_frames(
        ctx: SessionContext,
        frames: Vec<Result<Message, axum::Error>>,
    ) -> (Arc<RecordingSocket>, CloseCause) {
        let socket = Arc::new(RecordingSocket::new());
        let session = Session::new(ctx, user(), SocketHandle::new(socket.clone()));
        let cause = session.run(futures::stream::iter(frames)).await;
        (socket, cause)
    }

    #[tokio::test]
    async fn welcome_is_first_frame() {
        let (socket, cause) = run_frames(context(), vec![]).await;

        let sent = socket.sent_json();
        assert_eq!(sent[0]["event"], "auth");
        assert_eq!(sent[0]["status"], "1000");
        assert_eq!(sent[0]["data"]["username"], "admin");
        assert_eq!(sent[0]["data"]["message"], "success");
        assert!(sent[0]["data"]["connection_id"].is_string());
        assert_eq!(cause, CloseCause::RemoteClosed);
        assert_eq!(socket.close_frame().unwrap().0, 1000);
    }

    #[tokio::test]
    async fn ping_gets_pong_with_timestamp() {
        let (socket, _) = run_frames(context(), vec![text(serde_json::json!({"event": "ping"}))]).await;

        let pong = &socket.sent_json()[1];
        assert_eq!(pong["event"], "pong");
        assert_eq!(pong["status"], "1000");
        assert!(pong["data"]["timestamp"].is_i64());
    }

    #[tokio::test]
    async fn subscribe_registers_channel_and_echoes_it() {
        let ctx = context();
        let registry = ctx.registry.clone();
        let (tx, rx) = mpsc::unbounded();
        let socket = Arc::new(RecordingSocket::new());
        let session = Session::new(ctx, user(), SocketHandle::new(socket.clone()));
        let conn = session.connection_id();
        let task = tokio::spawn(session.run(rx));

        tx.unbounded_send(text(serde_json::json!({"event": "subscribe", "channel": "order_update"})))
            .unwrap();
        for _ in 0..100 {
            if socket.sent().len() >= 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let reply = &socket.sent_json()[1];
        assert_eq!(reply["event"], "subscribe");
        assert_eq!(reply["status"], "1000");
        assert_eq!(reply["channel"], "order_update");
        assert_eq!(reply["data"]["connection_id"], conn.to_string());
        assert_eq!(registry.get_by_channel("order_update").len(), 1);

        drop(tx);
        assert_eq!(task.await.unwrap(), CloseCause::RemoteClosed);
        assert!(registry.get_by_channel("order_update").is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn subscribe_without_channel_is_rejected() {
        let (socket, _) =
            run_frames(context(), vec![text(serde_json::json!({"event": "subscribe"}))]).await;

        let reply = &socket.sent_json()[1];
        assert_eq!(reply["event"], "subscribe");
        assert_eq!(reply["status"], "1002");
        assert_eq!(reply["data"]["error"], "Channel name is required");
    }

    #[tokio::test]
    async fn subscribe_to_unknown_channel_is_rejected() {
        let ctx = context();
        let registry = ctx.registry.clone();
        let (socket, _) = run_frames(
            ctx,
            vec![text(serde_json::json!({"event": "subscribe", "channel": "foo"}))],
        )
        .await;

        let reply = &socket.sent_json()[1];
        assert_eq!(reply["status"], "1002");
        assert_eq!(reply["data"]["error"], "invalid channel name: foo");
        assert!(registry.get_by_channel("foo").is_empty());
    }

    #[tokio::test]
    async fn malformed_json_keeps_session_active() {
        let (socket, cause) = run_frames(
            context(),
            vec![
                Ok(Message::Text("{not json".to_string())),
                text(serde_json::json!({"event": "ping"})),
            ],
        )
        .await;

        let sent = socket.sent_json();
        assert_eq!(sent[1]["status"], "1001");
        assert_eq!(sent[2]["event"], "pong");
        assert_eq!(cause, CloseCause::RemoteClosed);
    }

    #[tokio::test]
    async fn unknown_event_is_answered_with_1003() {
        let (socket, _) =
            run_frames(context(), vec![text(serde_json::json!({"event": "dance"}))]).await;

        let reply = &socket.sent_json()[1];
        assert_eq!(reply["status"], "1003");
        assert_eq!(reply["data"]["error"], "Unknown event type");
    }

    #[tokio::test]
    async fn binary_frames_are_ignored() {
        let (socket, _) = run_frames(
            context(),
            vec![Ok(Message::Binary(vec![1, 2, 3])), text(serde_json::json!({"event": "ping"}))],
        )
        .await;

        let sent = socket.sent_json();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1]["event"], "pong");
    }

    #[tokio::test]
    async fn read_error_closes_with_internal_error() {
        let ctx = context();
        let registry = ctx.registry.clone();
        let (socket, cause) =
            run_frames(ctx, vec![Err(axum::Error::new(std::io::Error::other("reset")))]).await;

        assert_eq!(cause, CloseCause::ReadError);
        assert_eq!(socket.close_frame().unwrap().0, 1011);
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn failed_welcome_deregisters() {
        let ctx = context();
        let registry = ctx.registry.clone();
        let socket = Arc::new(RecordingSocket::broken());
        let session = Session::new(ctx, user(), SocketHandle::new(socket));

        let cause = session.run(futures::stream::pending::<Result<Message, axum::Error>>()).await;

        assert_eq!(cause, CloseCause::WelcomeFailed);
        assert_eq!(registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn failed_registration_closes_without_welcome() {
        let ctx = context();
        let registry = ctx.registry.clone();
        let socket = Arc::new(RecordingSocket::new());
        let session = Session::new(ctx, user(), SocketHandle::new(socket.clone()));

        let connection_id = session.connection_id();
        let other = UserId::new("someone-else").unwrap();
        let squatter = SocketHandle::new(Arc::new(RecordingSocket::new()));
        registry.add(&other, connection_id, squatter, true).unwrap();

        let cause = session.run(futures::stream::pending::<Result<Message, axum::Error>>()).await;

        assert_eq!(cause, CloseCause::RegistrationFailed);
        assert!(socket.sent().is_empty());
        assert_eq!(
            socket.close_frame(),
            Some((1011, "registration failed".to_string()))
        );
        assert_eq!(registry.connection_count(), 1);
        assert_eq!(registry.get_user_for_connection(connection_id), Some(other));
    }

    #[tokio::test]
    async fn eviction_ends_session() {
        let ctx = context();
        let socket = Arc::new(RecordingSocket::new());
        let handle = SocketHandle::new(socket.clone());
        let session = Session::new(ctx, user(), handle.clone());
        let task = tokio::spawn(session.run(futures::stream::pending::<Result<Message, axum::Error>>()));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.evict();

        assert_eq!(task.await.unwrap(), CloseCause::Evicted);
        assert_eq!(socket.close_frame().unwrap().0, 1011);
    }

    #[tokio::test]
    async fn shutdown_says_goodbye() {
        let ctx = context();
        let shutdown = ctx.shutdown.clone();
        let socket = Arc::new(RecordingSocket::new());
        let session = Session::new(ctx, user(), SocketHandle::new(socket.clone()));
        let task = tokio::spawn(session.run(futures::stream::pending::<Result<Message, axum::Error>>()));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        shutdown.cancel();

        assert_eq!(task.await.unwrap(), CloseCause::Shutdown);
        assert_eq!(socket.close_frame().unwrap().0, 1001);
    }
}
