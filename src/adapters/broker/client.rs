//! BrokerClient - owns the broker link and runs consumers.
//!
//! Holds one transport connection and one logical channel behind an
//! `RwLock`. Publishers clone the channel handle under a short read lock;
//! reconnect takes the write lock to swap the whole link, so a publish sees
//! either the old link, no link (`NotConnected`), or the new one.
//!
//! ## Settlement policy
//!
//! | Outcome | Action |
//! |---------|--------|
//! | handler `Ok` | ack |
//! | body is not JSON | nack, no requeue |
//! | `HandlerError::NoSubscribers` | ack |
//! | `HandlerError::Permanent` | nack, no requeue |
//! | `HandlerError::Transient` | nack with requeue below `max_requeue_attempts`, else nack |
//!
//! ## Reconnect
//!
//! | Setting | Default |
//! |---------|---------|
//! | `initial_backoff` | 1s |
//! | `max_backoff` | 30s |

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ports::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerEnvelope, BrokerError, Delivery,
    DeliveryStream, ExchangeKind, HandlerError, MessageHandler,
};

/// Connection settings for [`BrokerClient`].
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub url: String,
    pub exchange_name: String,
    pub exchange_kind: ExchangeKind,
    /// Requeue a transiently failed delivery while its redelivery count is below this.
    pub max_requeue_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl BrokerSettings {
    pub fn new(url: impl Into<String>, exchange_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange_name: exchange_name.into(),
            exchange_kind: ExchangeKind::Topic,
            max_requeue_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn with_exchange_kind(mut self, kind: ExchangeKind) -> Self {
        self.exchange_kind = kind;
        self
    }

    pub fn with_max_requeue_attempts(mut self, attempts: u32) -> Self {
        self.max_requeue_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}

/// Why a consumer loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// The caller's cancellation token fired.
    Cancelled,
    /// The broker channel closed or the delivery stream failed.
    ChannelClosed,
}

struct Link {
    connection: Arc<dyn BrokerConnection>,
    channel: Arc<dyn BrokerChannel>,
}

/// Client for one exchange on one broker.
pub struct BrokerClient {
    connector: Arc<dyn BrokerConnector>,
    settings: BrokerSettings,
    link: RwLock<Option<Link>>,
    reconnecting: Mutex<()>,
}

impl BrokerClient {
    /// Dials the broker, opens a channel and declares the exchange.
    pub async fn connect(
        connector: Arc<dyn BrokerConnector>,
        settings: BrokerSettings,
    ) -> Result<Self, BrokerError> {
        if settings.exchange_name.is_empty() {
            return Err(BrokerError::Config("exchange name required".to_string()));
        }

        let link = open_link(connector.as_ref(), &settings).await?;
        tracing::info!(
            exchange = %settings.exchange_name,
            kind = %settings.exchange_kind,
            "Connected to message broker"
        );

        Ok(Self {
            connector,
            settings,
            link: RwLock::new(Some(link)),
            reconnecting: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// True while a link exists and its channel is open.
    pub async fn is_connected(&self) -> bool {
        self.link
            .read()
            .await
            .as_ref()
            .map(|link| link.channel.is_open())
            .unwrap_or(false)
    }

    async fn channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let guard = self.link.read().await;
        match guard.as_ref() {
            Some(link) if link.channel.is_open() => Ok(link.channel.clone()),
            _ => Err(BrokerError::NotConnected),
        }
    }

    /// Publishes `payload` as persistent JSON. Never retries.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        routing_key: &str,
        payload: &T,
        cancel: &CancellationToken,
    ) -> Result<(), BrokerError> {
        if cancel.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }

        let body =
            serde_json::to_vec(payload).map_err(|e| BrokerError::Serialization(e.to_string()))?;
        let channel = self.channel().await?;

        tracing::debug!(routing_key, bytes = body.len(), "Publishing message");

        tokio::select! {
            _ = cancel.cancelled() => Err(BrokerError::Cancelled),
            result = channel.publish(&self.settings.exchange_name, routing_key, body, true) => {
                result.map_err(|e| match e {
                    BrokerError::NotConnected => BrokerError::NotConnected,
                    other => BrokerError::Publish(other.to_string()),
                })
            }
        }
    }

    /// Declares `queue`, binds it once per routing key and spawns the delivery loop.
    ///
    /// The returned task resolves with the reason the loop stopped.
    pub async fn start_consumer(
        &self,
        queue: &str,
        routing_keys: &[String],
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<ConsumerExit>, BrokerError> {
        let channel = self.channel().await?;

        channel.declare_queue(queue).await?;
        tracing::info!(queue, "Queue declared");

        for key in routing_keys {
            channel
                .bind_queue(queue, &self.settings.exchange_name, key)
                .await?;
            tracing::info!(
                queue,
                exchange = %self.settings.exchange_name,
                routing_key = %key,
                "Queue bound"
            );
        }

        let consumer_tag = format!("{}-{}", queue, uuid::Uuid::new_v4());
        let deliveries = channel.consume(queue, &consumer_tag).await?;
        tracing::info!(queue, handler = handler.name(), "Consumer registered");

        let queue = queue.to_string();
        let max_requeue_attempts = self.settings.max_requeue_attempts;

        Ok(tokio::spawn(consume_loop(
            queue,
            deliveries,
            handler,
            max_requeue_attempts,
            cancel,
        )))
    }

    /// Rebuilds the link with exponential backoff.
    ///
    /// Concurrent callers queue up; a caller that finds the link already
    /// restored returns immediately.
    pub async fn reconnect(&self, max_retries: u32) -> Result<(), BrokerError> {
        let _turn = self.reconnecting.lock().await;

        if self.is_connected().await {
            tracing::debug!("Broker link already restored");
            return Ok(());
        }

        if let Some(stale) = self.link.write().await.take() {
            close_link(stale).await;
        }

        let mut backoff = self.settings.initial_backoff;
        let mut last_error = BrokerError::NotConnected;

        for attempt in 1..=max_retries {
            tracing::info!(attempt, max_retries, "Reconnecting to message broker");

            match open_link(self.connector.as_ref(), &self.settings).await {
                Ok(link) => {
                    *self.link.write().await = Some(link);
                    tracing::info!(attempt, "Reconnected to message broker");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                    last_error = e;
                }
            }

            if attempt < max_retries {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.settings.max_backoff);
            }
        }

        Err(BrokerError::ReconnectExhausted {
            attempts: max_retries,
            last: last_error.to_string(),
        })
    }

    /// Releases the channel, then the connection. Safe to call repeatedly.
    pub async fn close(&self) -> Result<(), BrokerError> {
        let link = self.link.write().await.take();
        match link {
            Some(link) => {
                let channel_result = link.channel.close().await;
                let connection_result = link.connection.close().await;
                tracing::info!("Broker client closed");
                channel_result.and(connection_result)
            }
            None => Ok(()),
        }
    }
}

async fn open_link(
    connector: &dyn BrokerConnector,
    settings: &BrokerSettings,
) -> Result<Link, BrokerError> {
    let connection = connector.dial(&settings.url).await.map_err(|e| match e {
        BrokerError::Connection(_) => e,
        other => BrokerError::Connection(other.to_string()),
    })?;

    let channel = match connection.open_channel().await {
        Ok(channel) => channel,
        Err(e) => {
            let _ = connection.close().await;
            return Err(e);
        }
    };

    if let Err(e) = channel
        .declare_exchange(&settings.exchange_name, settings.exchange_kind)
        .await
    {
        let _ = channel.close().await;
        let _ = connection.close().await;
        return Err(e);
    }

    Ok(Link {
        connection,
        channel,
    })
}

async fn close_link(link: Link) {
    if let Err(e) = link.channel.close().await {
        tracing::debug!(error = %e, "Closing stale channel failed");
    }
    if let Err(e) = link.connection.close().await {
        tracing::debug!(error = %e, "Closing stale connection failed");
    }
}

async fn consume_loop(
    queue: String,
    mut deliveries: DeliveryStream,
    handler: Arc<dyn MessageHandler>,
    max_requeue_attempts: u32,
    cancel: CancellationToken,
) -> ConsumerExit {
    let exit = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break ConsumerExit::Cancelled,
            next = deliveries.next() => match next {
                Some(Ok(delivery)) => {
                    settle(&queue, delivery, handler.as_ref(), max_requeue_attempts).await;
                }
                Some(Err(e)) => {
                    tracing::warn!(queue = %queue, error = %e, "Delivery stream failed");
                    break ConsumerExit::ChannelClosed;
                }
                None => {
                    tracing::warn!(queue = %queue, "Broker channel closed");
                    break ConsumerExit::ChannelClosed;
                }
            }
        }
    };

    tracing::info!(queue = %queue, exit = ?exit, "Consumer stopped");
    exit
}

/// Runs the handler for one delivery and settles it.
async fn settle(
    queue: &str,
    delivery: Delivery,
    handler: &dyn MessageHandler,
    max_requeue_attempts: u32,
) {
    let Delivery {
        routing_key,
        body,
        redelivery_count,
        acker,
    } = delivery;

    let payload = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(queue, routing_key = %routing_key, error = %e, "Dropping non-JSON message");
            if let Err(e) = acker.nack(false).await {
                tracing::error!(queue, error = %e, "Failed to nack message");
            }
            return;
        }
    };

    let outcome = handler
        .handle(BrokerEnvelope::new(routing_key.clone(), payload))
        .await;

    let settled = match outcome {
        Ok(()) => {
            tracing::debug!(queue, routing_key = %routing_key, "Message processed");
            acker.ack().await
        }
        Err(HandlerError::NoSubscribers { channel }) => {
            tracing::info!(queue, channel = %channel, "No subscribers, dropping message");
            acker.ack().await
        }
        Err(e) if e.is_retryable() && redelivery_count < max_requeue_attempts => {
            tracing::warn!(
                queue,
                routing_key = %routing_key,
                redelivery_count,
                error = %e,
                "Transient handler failure, requeueing"
            );
            acker.nack(true).await
        }
        Err(e) => {
            tracing::error!(
                queue,
                routing_key = %routing_key,
                redelivery_count,
                handler = handler.name(),
                error = %e,
                "Handler failed, rejecting message"
            );
            acker.nack(false).await
        }
    };

    if let Err(e) = settled {
        tracing::error!(queue, error = %e, "Failed to settle message");
    }
}
