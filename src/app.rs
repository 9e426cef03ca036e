//! Gateway assembly - wires configuration, broker, registry and routes.
//!
//! # Shutdown order
//!
//! ```text
//! stop upgrades → cancel binding scopes → close broker → goodbye (1001) to sessions
//! ```
//!
//! All steps run inside the configured grace period.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::adapters::auth::HmacJwtValidator;
use crate::adapters::broker::{AmqpConnector, BrokerClient, BrokerSettings, InMemoryBroker};
use crate::adapters::http::{gateway_routes, GatewayHandlers};
use crate::adapters::websocket::{
    websocket_router, ChannelBroadcaster, ConnectionRegistry, SessionContext, WebSocketState,
};
use crate::config::{AppConfig, ValidationError};
use crate::domain::gateway::ChannelCatalog;
use crate::ports::{BrokerConnector, BrokerError, SessionValidator};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("Broker unavailable: {0}")]
    Broker(#[from] BrokerError),
}

/// Everything `GatewayApp::start` needs besides configuration.
pub struct GatewayParts {
    pub connector: Arc<dyn BrokerConnector>,
    pub validator: Arc<dyn SessionValidator>,
    pub settings: BrokerSettings,
    pub catalog: ChannelCatalog,
    pub ws_path: String,
    pub max_reconnect_retries: u32,
    pub write_timeout: Duration,
}

impl GatewayParts {
    /// Resolves the adapters named by the configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, ValidationError> {
        let connector: Arc<dyn BrokerConnector> = if config.broker.is_in_memory() {
            tracing::warn!("Using in-process broker; messages are not shared with other processes");
            Arc::new(InMemoryBroker::new())
        } else {
            Arc::new(AmqpConnector::new())
        };

        let validator = HmacJwtValidator::new(config.auth.jwt_secret.clone())
            .with_token_ttl_hours(config.auth.token_ttl_hours);

        Ok(Self {
            connector,
            validator: Arc::new(validator),
            settings: config.broker.settings()?,
            catalog: config.catalog()?,
            ws_path: config.server.ws_path.clone(),
            max_reconnect_retries: config.broker.max_reconnect_retries,
            write_timeout: config.server.write_timeout(),
        })
    }
}

/// A running gateway: broker connected and one supervisor per channel.
pub struct GatewayApp {
    registry: Arc<ConnectionRegistry>,
    broker: Arc<BrokerClient>,
    ws_state: WebSocketState,
    validator: Arc<dyn SessionValidator>,
    api: GatewayHandlers,
    ws_path: String,
    bindings: CancellationToken,
    goodbye: CancellationToken,
    supervisors: Vec<JoinHandle<()>>,
}

impl GatewayApp {
    /// Connects the broker and starts consuming every configured channel.
    pub async fn start(parts: GatewayParts) -> Result<Self, AppError> {
        let broker = Arc::new(BrokerClient::connect(parts.connector, parts.settings).await?);
        let registry = Arc::new(ConnectionRegistry::new());
        let catalog = Arc::new(parts.catalog);

        let bindings = CancellationToken::new();
        let goodbye = CancellationToken::new();

        let supervisors = catalog
            .bindings()
            .iter()
            .map(|binding| {
                tracing::info!(
                    channel = %binding.channel_name,
                    queue = %binding.queue_name,
                    "Starting channel consumer"
                );
                let broadcaster = ChannelBroadcaster::new(
                    binding.clone(),
                    registry.clone(),
                    broker.clone(),
                    bindings.child_token(),
                )
                .with_max_reconnect_retries(parts.max_reconnect_retries)
                .with_write_timeout(parts.write_timeout);
                tokio::spawn(Arc::new(broadcaster).run())
            })
            .collect();

        let sessions = SessionContext::new(registry.clone(), catalog, goodbye.clone());
        let ws_state = WebSocketState::new(parts.validator.clone(), sessions);
        let api = GatewayHandlers::new(broker.clone(), registry.clone(), bindings.clone());

        Ok(Self {
            registry,
            broker,
            ws_state,
            validator: parts.validator,
            api,
            ws_path: parts.ws_path,
            bindings,
            goodbye,
            supervisors,
        })
    }

    /// WebSocket endpoint plus the operator API.
    pub fn router(&self) -> Router {
        websocket_router(&self.ws_path)
            .with_state(self.ws_state.clone())
            .merge(gateway_routes(self.api.clone(), self.validator.clone()))
            .layer(TraceLayer::new_for_http())
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<BrokerClient> {
        &self.broker
    }

    /// Ordered shutdown, bounded by `grace`.
    pub async fn shutdown(self, grace: Duration) {
        tracing::info!(
            connections = self.registry.connection_count(),
            "Shutting down gateway"
        );

        self.ws_state.draining.cancel();
        self.bindings.cancel();

        let goodbye = self.goodbye.clone();
        let tracker = self.ws_state.tracker.clone();
        let broker = self.broker.clone();
        let supervisors = self.supervisors;

        let ordered = async move {
            for supervisor in supervisors {
                if let Err(e) = supervisor.await {
                    tracing::warn!(error = %e, "Channel supervisor ended abnormally");
                }
            }
            if let Err(e) = broker.close().await {
                tracing::warn!(error = %e, "Broker close failed");
            }
            goodbye.cancel();
            tracker.close();
            tracker.wait().await;
        };

        if tokio::time::timeout(grace, ordered).await.is_err() {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                remaining = self.registry.connection_count(),
                "Shutdown grace period elapsed"
            );
            self.goodbye.cancel();
        }

        tracing::info!("Gateway stopped");
    }
}
