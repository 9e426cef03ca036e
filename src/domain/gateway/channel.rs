//! Channel bindings and the subscribe allow-list.
//!
//! A channel is a named topic clients subscribe to. Each one maps 1:1 to a
//! durable broker queue bound with one or more routing-key patterns. The
//! set of configured bindings is exactly the set of subscribable channels.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::ValidationError;

use super::envelope::ClientError;
use super::topic::RoutingPattern;

/// Static binding of one logical channel to one broker queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub channel_name: String,
    pub queue_name: String,
    pub routing_keys: Vec<String>,
}

impl ChannelBinding {
    pub fn new(
        channel_name: impl Into<String>,
        queue_name: impl Into<String>,
        routing_keys: Vec<String>,
    ) -> Self {
        Self {
            channel_name: channel_name.into(),
            queue_name: queue_name.into(),
            routing_keys,
        }
    }

    /// The order-update binding the gateway ships with.
    pub fn order_update() -> Self {
        Self::new("order_update", "ws_order_queue", vec!["ws_order.#".to_string()])
    }

    /// Parsed routing patterns for this binding.
    pub fn patterns(&self) -> Result<Vec<RoutingPattern>, ValidationError> {
        self.routing_keys
            .iter()
            .map(|key| RoutingPattern::parse(key.clone()))
            .collect()
    }

    /// Validates names and routing-key patterns.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.channel_name.is_empty() {
            return Err(ValidationError::empty_field("channel_name"));
        }
        if self.queue_name.is_empty() {
            return Err(ValidationError::empty_field("queue_name"));
        }
        if self.routing_keys.is_empty() {
            return Err(ValidationError::empty_field("routing_keys"));
        }
        self.patterns().map(|_| ())
    }
}

/// The fixed allow-list of subscribable channels.
#[derive(Debug, Clone, Default)]
pub struct ChannelCatalog {
    bindings: Vec<ChannelBinding>,
}

impl ChannelCatalog {
    /// Builds a catalog, rejecting invalid bindings and duplicate channel names.
    pub fn new(bindings: Vec<ChannelBinding>) -> Result<Self, ValidationError> {
        for (i, binding) in bindings.iter().enumerate() {
            binding.validate()?;
            if bindings[..i]
                .iter()
                .any(|b| b.channel_name == binding.channel_name)
            {
                return Err(ValidationError::invalid_format(
                    "channels",
                    format!("duplicate channel '{}'", binding.channel_name),
                ));
            }
        }
        Ok(Self { bindings })
    }

    /// Looks up a binding by channel name.
    pub fn get(&self, channel_name: &str) -> Option<&ChannelBinding> {
        self.bindings.iter().find(|b| b.channel_name == channel_name)
    }

    /// Validates a subscribe request against the allow-list.
    pub fn resolve(&self, requested: Option<&str>) -> Result<&ChannelBinding, ClientError> {
        let name = requested.ok_or(ClientError::MissingChannel)?;
        self.get(name)
            .ok_or_else(|| ClientError::UnknownChannel(name.to_string()))
    }

    pub fn bindings(&self) -> &[ChannelBinding] {
        &self.bindings
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
