//! Channel binding configuration

use crate::domain::gateway::{ChannelBinding, ChannelCatalog};

use super::error::ValidationError;

/// Bindings used when none are configured.
pub fn default_channels() -> Vec<ChannelBinding> {
    vec![ChannelBinding::order_update()]
}

/// Builds the subscribe allow-list from the configured bindings.
pub fn build_catalog(channels: &[ChannelBinding]) -> Result<ChannelCatalog, ValidationError> {
    if channels.is_empty() {
        return Err(ValidationError::InvalidChannels(
            "at least one channel is required".to_string(),
        ));
    }
    ChannelCatalog::new(channels.to_vec())
        .map_err(|e| ValidationError::InvalidChannels(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_channels_build() {
        let catalog = build_catalog(&default_channels()).unwrap();
        assert!(catalog.get("order_update").is_some());
    }

    #[test]
    fn test_empty_channels_rejected() {
        assert!(matches!(
            build_catalog(&[]),
            Err(ValidationError::InvalidChannels(_))
        ));
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let channels = vec![ChannelBinding::order_update(), ChannelBinding::order_update()];
        assert!(matches!(
            build_catalog(&channels),
            Err(ValidationError::InvalidChannels(_))
        ));
    }

    #[test]
    fn test_binding_without_keys_rejected() {
        let channels = vec![ChannelBinding::new("alerts", "ws_alert_queue", vec![])];
        assert!(matches!(
            build_catalog(&channels),
            Err(ValidationError::InvalidChannels(_))
        ));
    }
}
