//! AMQP 0.9.1 transport backed by `lapin`.
//!
//! Maps the broker ports onto RabbitMQ primitives: durable exchanges and
//! queues, persistent JSON publishes with publisher confirms awaited, and
//! manual-ack consumers.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use crate::ports::{
    BrokerChannel, BrokerConnection, BrokerConnector, BrokerError, Delivery, DeliveryAcker,
    DeliveryStream, ExchangeKind,
};

const PERSISTENT: u8 = 2;
const REPLY_SUCCESS: u16 = 200;

/// Dials RabbitMQ.
#[derive(Debug, Default, Clone)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrokerConnector for AmqpConnector {
    async fn dial(&self, url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Arc::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("failed to open a channel: {}", e)))?;

        Ok(Arc::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "gateway closing")
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }
}

struct AmqpChannel {
    channel: Channel,
}

impl AmqpChannel {
    /// A failure on a channel that has since closed is reported as `NotConnected`.
    fn fail(&self, error: BrokerError) -> BrokerError {
        if self.channel.status().connected() {
            error
        } else {
            BrokerError::NotConnected
        }
    }
}

/// Channel queues are quorum queues so redeliveries carry `x-delivery-count`.
fn queue_arguments() -> FieldTable {
    let mut arguments = FieldTable::default();
    arguments.insert(
        ShortString::from("x-queue-type"),
        AMQPValue::LongString(LongString::from("quorum")),
    );
    arguments
}

fn to_lapin_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
    }
}

/// Prior deliveries of a message.
///
/// Quorum queues report an exact `x-delivery-count`. Classic queues only
/// flag redelivery, so a flagged message without a count is treated as
/// having used up its retries.
fn redelivery_count(properties: &BasicProperties, redelivered: bool) -> u32 {
    let counted = properties.headers().as_ref().and_then(|headers| {
        headers
            .inner()
            .iter()
            .find(|(key, _)| key.as_str() == "x-delivery-count")
            .and_then(|(_, value)| match value {
                AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
                AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
                AMQPValue::LongUInt(n) => Some(*n),
                AMQPValue::ShortInt(n) => u32::try_from(*n).ok(),
                _ => None,
            })
    });

    match counted {
        Some(count) => count,
        None if redelivered => u32::MAX,
        None => 0,
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), BrokerError> {
        self.channel
            .exchange_declare(
                name,
                to_lapin_kind(kind),
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                self.fail(BrokerError::Topology(format!(
                    "failed to declare exchange {}: {}",
                    name, e
                )))
            })
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_arguments(),
            )
            .await
            .map(|_| ())
            .map_err(|e| {
                self.fail(BrokerError::Topology(format!(
                    "failed to declare queue {}: {}",
                    name, e
                )))
            })
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                self.fail(BrokerError::Topology(format!(
                    "failed to bind {} to {} with {}: {}",
                    queue, exchange, routing_key, e
                )))
            })
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        persistent: bool,
    ) -> Result<(), BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::NotConnected);
        }

        let mut properties =
            BasicProperties::default().with_content_type("application/json".into());
        if persistent {
            properties = properties.with_delivery_mode(PERSISTENT);
        }

        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;

        confirm
            .await
            .map(|_| ())
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                self.fail(BrokerError::Consume(format!(
                    "failed to register a consumer: {}",
                    e
                )))
            })?;

        let deliveries = consumer.map(|result| {
            result
                .map(|delivery| Delivery {
                    routing_key: delivery.routing_key.as_str().to_string(),
                    redelivery_count: redelivery_count(&delivery.properties, delivery.redelivered),
                    body: delivery.data,
                    acker: Box::new(AmqpAcker {
                        acker: delivery.acker,
                    }),
                })
                .map_err(|e| BrokerError::Consume(e.to_string()))
        });

        Ok(deliveries.boxed())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if !self.is_open() {
            return Ok(());
        }
        self.channel
            .close(REPLY_SUCCESS, "gateway closing")
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait]
impl DeliveryAcker for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Consume(format!("ack failed: {}", e)))
    }

    async fn nack(&self, requeue: bool) -> Result<(), BrokerError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(|e| BrokerError::Consume(format!("nack failed: {}", e)))
    }
}
