//! Channel broadcaster - fans broker deliveries out to subscribed sockets.
//!
//! # Delivery Flow
//!
//! ```text
//! Broker queue (ws_order_queue)
//!          │
//!          ▼
//! ┌──────────────────────┐
//! │ ChannelBroadcaster   │
//! │  registry lookup by  │
//! │  channel name        │
//! └──────────────────────┘
//!          │
//!          ▼
//! ┌──────────────────────┐
//! │  wrap payload in an  │
//! │  "update" envelope,  │
//! │  serialize once      │
//! └──────────────────────┘
//!          │
//!          ▼
//! ┌──────────────────────┐
//! │  write to each       │
//! │  socket, then evict  │
//! │  the ones that failed│
//! └──────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapters::broker::{BrokerClient, ConsumerExit};
use crate::domain::foundation::ConnectionId;
use crate::domain::gateway::{events, ChannelBinding, Envelope};
use crate::ports::{BrokerEnvelope, BrokerError, HandlerError, MessageHandler, SocketError};

use super::registry::ConnectionRegistry;

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Binds one configured channel to its broker queue.
pub struct ChannelBroadcaster {
    binding: ChannelBinding,
    registry: Arc<ConnectionRegistry>,
    broker: Arc<BrokerClient>,
    cancel: CancellationToken,
    max_reconnect_retries: u32,
    write_timeout: Duration,
}

impl ChannelBroadcaster {
    /// `cancel` scopes this binding; cancelling it stops consumption.
    pub fn new(
        binding: ChannelBinding,
        registry: Arc<ConnectionRegistry>,
        broker: Arc<BrokerClient>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            binding,
            registry,
            broker,
            cancel,
            max_reconnect_retries: 5,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_max_reconnect_retries(mut self, retries: u32) -> Self {
        self.max_reconnect_retries = retries;
        self
    }

    /// A write that misses this deadline counts as failed.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Starts consuming the binding's queue with this broadcaster as handler.
    pub async fn start_consumer(self: &Arc<Self>) -> Result<JoinHandle<ConsumerExit>, BrokerError> {
        self.broker
            .start_consumer(
                &self.binding.queue_name,
                &self.binding.routing_keys,
                self.clone(),
                self.cancel.clone(),
            )
            .await
    }

    /// Cancels the binding scope.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Keeps the consumer alive across broker outages until cancelled.
    pub async fn run(self: Arc<Self>) {
        let channel = self.binding.channel_name.clone();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let consumer = match self.start_consumer().await {
                Ok(consumer) => consumer,
                Err(e) => {
                    let link_lost = matches!(e, BrokerError::NotConnected | BrokerError::Connection(_))
                        || !self.broker.is_connected().await;
                    if !link_lost {
                        tracing::error!(channel = %channel, error = %e, "Failed to start consumer");
                        break;
                    }
                    tracing::warn!(channel = %channel, error = %e, "Broker link lost while starting consumer");
                    if self.recover().await {
                        continue;
                    }
                    break;
                }
            };

            match consumer.await {
                Ok(ConsumerExit::Cancelled) => break,
                Ok(ConsumerExit::ChannelClosed) => {
                    if !self.recover().await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(channel = %channel, error = %e, "Consumer task failed");
                    break;
                }
            }
        }

        tracing::info!(channel = %channel, "Channel supervision stopped");
    }

    async fn recover(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            result = self.broker.reconnect(self.max_reconnect_retries) => match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(
                        channel = %self.binding.channel_name,
                        error = %e,
                        "Giving up on broker"
                    );
                    false
                }
            },
        }
    }

    /// Removes connections whose write failed and wakes their sessions.
    fn evict(&self, failed: Vec<ConnectionId>) {
        tracing::info!(
            channel = %self.binding.channel_name,
            count = failed.len(),
            "Removing broken connections"
        );
        for connection_id in failed {
            let Some(user_id) = self.registry.get_user_for_connection(connection_id) else {
                continue;
            };
            if let Some(record) = self.registry.remove_by_conn_id(&user_id, connection_id) {
                record.socket.evict();
            }
        }
    }
}

#[async_trait]
impl MessageHandler for ChannelBroadcaster {
    async fn handle(&self, envelope: BrokerEnvelope) -> Result<(), HandlerError> {
        let channel = &self.binding.channel_name;
        let targets = self.registry.get_by_channel(channel);

        if targets.is_empty() {
            return Err(HandlerError::NoSubscribers {
                channel: channel.clone(),
            });
        }

        let text = Envelope::success(events::UPDATE, envelope.payload)
            .with_channel(channel.as_str())
            .to_json()
            .map_err(|e| HandlerError::Permanent(format!("cannot serialize update: {}", e)))?;

        tracing::debug!(
            channel = %channel,
            routing_key = %envelope.routing_key,
            connections = targets.len(),
            "Broadcasting update"
        );

        let mut failed = Vec::new();
        for record in &targets {
            let written = tokio::time::timeout(self.write_timeout, record.socket.send_text(&text))
                .await
                .map_err(|_| SocketError::TimedOut(self.write_timeout))
                .and_then(|result| result);
            if let Err(e) = written {
                tracing::warn!(
                    channel = %channel,
                    connection_id = %record.connection_id,
                    user_id = %record.user_id,
                    error = %e,
                    "Failed to deliver update"
                );
                failed.push(record.connection_id);
            }
        }

        if !failed.is_empty() {
            self.evict(failed);
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.binding.channel_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::broker::{BrokerSettings, InMemoryBroker, Settlement};
    use crate::adapters::websocket::{RecordingSocket, SocketHandle};
    use crate::domain::foundation::UserId;
    use crate::ports::{BrokerChannel, BrokerConnection, BrokerConnector, ClientSocket, DeliveryStream, ExchangeKind};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        broker: Arc<InMemoryBroker>,
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<ChannelBroadcaster>,
    }

    async fn fixture() -> Fixture {
        let broker = Arc::new(InMemoryBroker::new());
        fixture_with(broker.clone(), broker).await
    }

    async fn fixture_with(connector: Arc<dyn BrokerConnector>, broker: Arc<InMemoryBroker>) -> Fixture {
        let settings = BrokerSettings::new("memory://test", "ws_events")
            .with_backoff(Duration::from_millis(1), Duration::from_millis(4));
        let client = Arc::new(BrokerClient::connect(connector, settings).await.unwrap());
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(
            ChannelBroadcaster::new(
                ChannelBinding::order_update(),
                registry.clone(),
                client,
                CancellationToken::new(),
            )
            .with_write_timeout(Duration::from_millis(50)),
        );
        Fixture {
            broker,
            registry,
            broadcaster,
        }
    }

    /// A peer that keeps the connection open but never reads.
    struct StalledSocket;

    #[async_trait]
    impl ClientSocket for StalledSocket {
        async fn send_text(&self, _text: &str) -> Result<(), SocketError> {
            std::future::pending().await
        }

        async fn close(&self, _code: u16, _reason: &str) -> Result<(), SocketError> {
            Ok(())
        }
    }

    /// Wraps the in-memory broker; the first queue declaration loses the link.
    struct FlakyConnector {
        broker: Arc<InMemoryBroker>,
        tripped: Arc<AtomicBool>,
    }

    struct FlakyConnection {
        inner: Arc<dyn BrokerConnection>,
        broker: Arc<InMemoryBroker>,
        tripped: Arc<AtomicBool>,
    }

    struct FlakyChannel {
        inner: Arc<dyn BrokerChannel>,
        broker: Arc<InMemoryBroker>,
        tripped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BrokerConnector for FlakyConnector {
        async fn dial(&self, url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
            Ok(Arc::new(FlakyConnection {
                inner: self.broker.dial(url).await?,
                broker: self.broker.clone(),
                tripped: self.tripped.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrokerConnection for FlakyConnection {
        async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
            Ok(Arc::new(FlakyChannel {
                inner: self.inner.open_channel().await?,
                broker: self.broker.clone(),
                tripped: self.tripped.clone(),
            }))
        }

        async fn close(&self) -> Result<(), BrokerError> {
            self.inner.close().await
        }
    }

    #[async_trait]
    impl BrokerChannel for FlakyChannel {
        async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
            self.inner.declare_exchange(name, kind).await
        }

        async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
            if !self.tripped.swap(true, Ordering::SeqCst) {
                self.broker.drop_connections();
                return Err(BrokerError::Topology(format!(
                    "failed to declare queue {}: invalid channel state",
                    name
                )));
            }
            self.inner.declare_queue(name).await
        }

        async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
            self.inner.bind_queue(queue, exchange, routing_key).await
        }

        async fn publish(&self, exchange: &str, routing_key: &str, body: Vec<u8>, persistent: bool) -> Result<(), BrokerError> {
            self.inner.publish(exchange, routing_key, body, persistent).await
        }

        async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
            self.inner.consume(queue, consumer_tag).await
        }

        async fn close(&self) -> Result<(), BrokerError> {
            self.inner.close().await
        }

        fn is_open(&self) -> bool {
            self.inner.is_open()
        }
    }

    fn subscribe(registry: &ConnectionRegistry, user: &str, socket: Arc<dyn ClientSocket>) -> (UserId, ConnectionId, SocketHandle) {
        let user_id = UserId::new(user).unwrap();
        let connection_id = ConnectionId::new();
        let handle = SocketHandle::new(socket);
        registry.add(&user_id, connection_id, handle.clone(), true).unwrap();
        registry.add_channel(&user_id, connection_id, "order_update").unwrap();
        (user_id, connection_id, handle)
    }

    fn update(payload: serde_json::Value) -> BrokerEnvelope {
        BrokerEnvelope::new("ws_order.created", payload)
    }

    #[tokio::test]
    async fn delivers_update_envelope_to_every_subscriber() {
        let f = fixture().await;
        let a = Arc::new(RecordingSocket::new());
        let b = Arc::new(RecordingSocket::new());
        subscribe(&f.registry, "alice", a.clone());
        subscribe(&f.registry, "bob", b.clone());

        f.broadcaster.handle(update(json!({"order": 1}))).await.unwrap();

        for socket in [a, b] {
            let sent = socket.sent_json();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0]["event"], "update");
            assert_eq!(sent[0]["status"], "1000");
            assert_eq!(sent[0]["channel"], "order_update");
            assert_eq!(sent[0]["data"], json!({"order": 1}));
        }
    }

    #[tokio::test]
    async fn unsubscribed_connections_are_skipped() {
        let f = fixture().await;
        let subscribed = Arc::new(RecordingSocket::new());
        let idle = Arc::new(RecordingSocket::new());
        subscribe(&f.registry, "alice", subscribed.clone());
        f.registry
            .add(&UserId::new("bob").unwrap(), ConnectionId::new(), SocketHandle::new(idle.clone()), true)
            .unwrap();

        f.broadcaster.handle(update(json!({}))).await.unwrap();

        assert_eq!(subscribed.sent().len(), 1);
        assert!(idle.sent().is_empty());
    }

    #[tokio::test]
    async fn zero_subscribers_is_a_soft_error() {
        let f = fixture().await;

        let result = f.broadcaster.handle(update(json!({}))).await;

        assert_eq!(
            result,
            Err(HandlerError::NoSubscribers {
                channel: "order_update".to_string()
            })
        );
    }

    #[tokio::test]
    async fn failed_write_evicts_only_that_connection() {
        let f = fixture().await;
        let healthy = Arc::new(RecordingSocket::new());
        let broken = Arc::new(RecordingSocket::new());
        broken.set_failing(true);
        let (alice, alice_conn, _) = subscribe(&f.registry, "alice", healthy.clone());
        let (bob, bob_conn, bob_handle) = subscribe(&f.registry, "bob", broken.clone());

        let result = f.broadcaster.handle(update(json!({"n": 1}))).await;

        assert!(result.is_ok());
        assert_eq!(healthy.sent().len(), 1);
        assert!(f.registry.get_by_conn_id(&alice, alice_conn).is_some());
        assert!(f.registry.get_by_conn_id(&bob, bob_conn).is_none());
        assert!(f.registry.get_user_for_connection(bob_conn).is_none());
        assert!(bob_handle.is_evicted());

        // Even with a working transport again, an evicted socket is never written.
        broken.set_failing(false);
        f.broadcaster.handle(update(json!({"n": 2}))).await.unwrap();

        assert!(broken.sent().is_empty());
        let received = healthy.sent_json();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1]["data"], json!({"n": 2}));
    }

    #[tokio::test]
    async fn stalled_write_times_out_and_evicts() {
        let f = fixture().await;
        let healthy = Arc::new(RecordingSocket::new());
        let (stuck_user, stuck_conn, stuck_handle) = subscribe(&f.registry, "bob", Arc::new(StalledSocket));
        subscribe(&f.registry, "alice", healthy.clone());

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            f.broadcaster.handle(update(json!({"n": 1}))),
        )
        .await
        .expect("fan-out should not wait on a stalled peer");

        assert!(result.is_ok());
        assert_eq!(healthy.sent().len(), 1);
        assert!(f.registry.get_by_conn_id(&stuck_user, stuck_conn).is_none());
        assert!(stuck_handle.is_evicted());
    }

    #[tokio::test]
    async fn consumed_messages_reach_subscribers() {
        let f = fixture().await;
        let socket = Arc::new(RecordingSocket::new());
        subscribe(&f.registry, "alice", socket.clone());

        f.broadcaster.start_consumer().await.unwrap();
        f.broker.inject("ws_events", "ws_order.filled", b"{\"id\":9}".to_vec());

        for _ in 0..200 {
            if !socket.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(socket.sent_json()[0]["data"], json!({"id": 9}));
    }

    #[tokio::test]
    async fn stop_ends_consumer() {
        let f = fixture().await;

        let consumer = f.broadcaster.start_consumer().await.unwrap();
        f.broadcaster.stop();

        assert_eq!(consumer.await.unwrap(), ConsumerExit::Cancelled);
    }

    #[tokio::test]
    async fn run_resumes_after_broker_restart() {
        let f = fixture().await;
        let socket = Arc::new(RecordingSocket::new());
        subscribe(&f.registry, "alice", socket.clone());

        let supervisor = tokio::spawn(f.broadcaster.clone().run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        f.broker.drop_connections();
        tokio::time::sleep(Duration::from_millis(50)).await;

        f.broker.inject("ws_events", "ws_order.after", b"{\"ok\":true}".to_vec());
        for _ in 0..200 {
            if !socket.sent().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(socket.sent_json()[0]["data"], json!({"ok": true}));

        f.broadcaster.stop();
        supervisor.await.unwrap();
        assert!(f
            .broker
            .settlements()
            .iter()
            .all(|(_, s)| *s == Settlement::Acked));
    }

    #[tokio::test]
    async fn run_recovers_when_link_drops_during_queue_declaration() {
        let broker = Arc::new(InMemoryBroker::new());
        let connector = Arc::new(FlakyConnector {
            broker: broker.clone(),
            tripped: Arc::new(AtomicBool::new(false)),
        });
        let f = fixture_with(connector, broker).await;
        let socket = Arc::new(RecordingSocket::new());
        subscribe(&f.registry, "alice", socket.clone());

        let supervisor = tokio::spawn(f.broadcaster.clone().run());

        for _ in 0..200 {
            f.broker.inject("ws_events", "ws_order.retry", b"{\"ok\":true}".to_vec());
            tokio::time::sleep(Duration::from_millis(5)).await;
            if !socket.sent().is_empty() {
                break;
            }
        }
        assert_eq!(socket.sent_json()[0]["data"], json!({"ok": true}));
        assert!(!supervisor.is_finished());

        f.broadcaster.stop();
        supervisor.await.unwrap();
    }
}
