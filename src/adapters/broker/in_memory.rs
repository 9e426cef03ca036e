//! In-memory topic broker.
//!
//! Implements the broker transport ports without a network. Exchanges,
//! durable queues and bindings live in the [`InMemoryBroker`] and are shared
//! by every connection dialled from it, so queues survive a reconnect the
//! way durable queues do on RabbitMQ.
//!
//! Used by the test suite and for local development (`memory://` broker URL).
//! Offers fault injection: failing dials and dropping every open channel.
//!
//! # Example
//!
//! ```ignore
//! let broker = Arc::new(InMemoryBroker::new());
//! let client = BrokerClient::connect(broker.clone(), settings).await?;
//! broker.drop_connections(); // consumers see ChannelClosed
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::domain::gateway::RoutingPattern;
use crate::ports::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerError, Delivery, DeliveryAcker,
    DeliveryStream, ExchangeKind,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A message as published, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub persistent: bool,
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Rejected,
    Requeued,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    routing_key: String,
    body: Vec<u8>,
    redelivery_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: Mutex<VecDeque<StoredMessage>>,
    notify: Notify,
}

impl QueueState {
    fn push_back(&self, message: StoredMessage) {
        lock(&self.messages).push_back(message);
        self.notify.notify_one();
    }

    fn push_front(&self, message: StoredMessage) {
        lock(&self.messages).push_front(message);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<StoredMessage> {
        lock(&self.messages).pop_front()
    }

    fn len(&self) -> usize {
        lock(&self.messages).len()
    }
}

#[derive(Debug)]
struct Binding {
    queue: String,
    exchange: String,
    pattern: RoutingPattern,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: Mutex<HashMap<String, ExchangeKind>>,
    queues: Mutex<HashMap<String, Arc<QueueState>>>,
    bindings: Mutex<Vec<Binding>>,
    open_channels: Mutex<Vec<CancellationToken>>,
    published: Mutex<Vec<PublishedMessage>>,
    settlements: Mutex<Vec<(String, Settlement)>>,
}

impl BrokerState {
    fn queue(&self, name: &str) -> Option<Arc<QueueState>> {
        lock(&self.queues).get(name).cloned()
    }

    fn route(&self, exchange: &str, kind: ExchangeKind, routing_key: &str) -> Vec<Arc<QueueState>> {
        let mut targets: Vec<String> = lock(&self.bindings)
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| match kind {
                ExchangeKind::Topic => b.pattern.matches(routing_key),
                ExchangeKind::Direct => b.pattern.as_str() == routing_key,
                ExchangeKind::Fanout | ExchangeKind::Headers => true,
            })
            .map(|b| b.queue.clone())
            .collect();
        targets.sort();
        targets.dedup();

        targets.iter().filter_map(|name| self.queue(name)).collect()
    }

    fn record_settlement(&self, routing_key: &str, settlement: Settlement) {
        lock(&self.settlements).push((routing_key.to_string(), settlement));
    }
}

/// In-process broker; clone the `Arc` to share it between dials.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
    failing_dials: AtomicU32,
    unavailable: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` dials fail with a connection error.
    pub fn fail_next_dials(&self, count: u32) {
        self.failing_dials.store(count, Ordering::SeqCst);
    }

    /// While unavailable every dial fails.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Closes every open channel, as a broker restart would.
    pub fn drop_connections(&self) {
        for token in lock(&self.state.open_channels).drain(..) {
            token.cancel();
        }
    }

    /// Publishes directly, bypassing any client.
    pub fn inject(&self, exchange: &str, routing_key: &str, body: impl Into<Vec<u8>>) {
        let kind = lock(&self.state.exchanges)
            .get(exchange)
            .copied()
            .unwrap_or_default();
        let body = body.into();
        for queue in self.state.route(exchange, kind, routing_key) {
            queue.push_back(StoredMessage {
                routing_key: routing_key.to_string(),
                body: body.clone(),
                redelivery_count: 0,
            });
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state.published).clone()
    }

    /// Settlements in order, keyed by routing key.
    pub fn settlements(&self) -> Vec<(String, Settlement)> {
        lock(&self.state.settlements).clone()
    }

    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state.queue(queue).map(|q| q.len()).unwrap_or(0)
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        lock(&self.state.exchanges).contains_key(name)
    }

    pub fn open_channel_count(&self) -> usize {
        lock(&self.state.open_channels)
            .iter()
            .filter(|t| !t.is_cancelled())
            .count()
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn dial(&self, url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection(format!("{}: broker unavailable", url)));
        }
        let failing = self
            .failing_dials
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(BrokerError::Connection(format!("{}: connection refused", url)));
        }

        Ok(Arc::new(InMemoryConnection {
            state: self.state.clone(),
            closed: CancellationToken::new(),
        }))
    }
}

struct InMemoryConnection {
    state: Arc<BrokerState>,
    closed: CancellationToken,
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        if self.closed.is_cancelled() {
            return Err(BrokerError::Connection("connection closed".to_string()));
        }

        let closed = self.closed.child_token();
        lock(&self.state.open_channels).push(closed.clone());

        Ok(Arc::new(InMemoryChannel {
            state: self.state.clone(),
            closed,
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.cancel();
        Ok(())
    }
}

struct InMemoryChannel {
    state: Arc<BrokerState>,
    closed: CancellationToken,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.is_cancelled() {
            return Err(BrokerError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let mut exchanges = lock(&self.state.exchanges);
        match exchanges.get(name) {
            Some(existing) if *existing != kind => Err(BrokerError::Topology(format!(
                "exchange {} already declared as {}",
                name, existing
            ))),
            Some(_) => Ok(()),
            None => {
                exchanges.insert(name.to_string(), kind);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.ensure_open()?;
        lock(&self.state.queues)
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if self.state.queue(queue).is_none() {
            return Err(BrokerError::Topology(format!("no queue {}", queue)));
        }
        if !lock(&self.state.exchanges).contains_key(exchange) {
            return Err(BrokerError::Topology(format!("no exchange {}", exchange)));
        }
        let pattern = RoutingPattern::parse(routing_key)
            .map_err(|e| BrokerError::Topology(e.to_string()))?;

        let mut bindings = lock(&self.state.bindings);
        let exists = bindings.iter().any(|b| {
            b.queue == queue && b.exchange == exchange && b.pattern.as_str() == routing_key
        });
        if !exists {
            bindings.push(Binding {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                pattern,
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        persistent: bool,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        let kind = lock(&self.state.exchanges)
            .get(exchange)
            .copied()
            .ok_or_else(|| BrokerError::Publish(format!("no exchange {}", exchange)))?;

        for queue in self.state.route(exchange, kind, routing_key) {
            queue.push_back(StoredMessage {
                routing_key: routing_key.to_string(),
                body: body.clone(),
                redelivery_count: 0,
            });
        }

        lock(&self.state.published).push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body,
            persistent,
        });
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        self.ensure_open()?;
        let queue = self
            .state
            .queue(queue)
            .ok_or_else(|| BrokerError::Consume(format!("no queue {}", queue)))?;
        let state = self.state.clone();
        let closed = self.closed.clone();

        let stream = futures::stream::unfold(
            (queue, state, closed),
            |(queue, state, closed)| async move {
                loop {
                    if closed.is_cancelled() {
                        return None;
                    }
                    if let Some(message) = queue.pop() {
                        let delivery = Delivery {
                            routing_key: message.routing_key.clone(),
                            body: message.body.clone(),
                            redelivery_count: message.redelivery_count,
                            acker: Box::new(InMemoryAcker {
                                queue: queue.clone(),
                                state: state.clone(),
                                message,
                            }),
                        };
                        return Some((Ok(delivery), (queue, state, closed)));
                    }
                    tokio::select! {
                        _ = closed.cancelled() => return None,
                        _ = queue.notify.notified() => {}
                    }
                }
            },
        );

        Ok(stream.boxed())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.cancel();
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

struct InMemoryAcker {
    queue: Arc<QueueState>,
    state: Arc<BrokerState>,
    message: StoredMessage,
}

#[async_trait]
impl DeliveryAcker for InMemoryAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.state
            .record_settlement(&self.message.routing_key, Settlement::Acked);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        if requeue {
            let mut message = self.message.clone();
            message.redelivery_count += 1;
            self.state
                .record_settlement(&message.routing_key, Settlement::Requeued);
            self.queue.push_front(message);
        } else {
            self.state
                .record_settlement(&self.message.routing_key, Settlement::Rejected);
        }
        Ok(())
    }
}
