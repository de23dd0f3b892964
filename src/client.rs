//! Caller-facing client façade
//!
//! Wires the credential provider, the websocket transport, and the
//! connection manager together behind the four operations the application
//! layer cares about. The bootstrap order matters: the first credential
//! refresh completes (and its failure surfaces here) before the connection
//! is attempted.

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionNotice, ConnectionState, MessageCallback};
use crate::credentials::cognito::CognitoIdentityExchange;
use crate::credentials::{CredentialProvider, IdentityExchange};
use crate::error::ClientResult;
use crate::transport::{BrokerTransport, ConnectionSettings, QoS, WebSocketMqtt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::info;

/// Long-lived pub/sub client over one broker connection.
pub struct PubSubClient {
    provider: CredentialProvider,
    manager: ConnectionManager,
}

impl PubSubClient {
    /// Build the production wiring: Cognito identity exchange, rotating
    /// provider, MQTT-over-websocket transport.
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let exchange = Arc::new(CognitoIdentityExchange::new()?);
        let options = config.provider_options();
        Ok(Self::with_parts(
            exchange,
            Arc::new(WebSocketMqtt::new()),
            options.identity_pool_id,
            options.region,
            config.refresh_interval(),
            config.connection_settings(),
        ))
    }

    /// Assemble a client from explicit parts. This is the seam tests use to
    /// swap in mock exchanges and transports.
    pub fn with_parts(
        exchange: Arc<dyn IdentityExchange>,
        transport: Arc<dyn BrokerTransport>,
        identity_pool_id: String,
        region: String,
        refresh_interval: Duration,
        settings: ConnectionSettings,
    ) -> Self {
        let provider = CredentialProvider::start(
            exchange,
            crate::credentials::ProviderOptions {
                identity_pool_id,
                region,
            },
            refresh_interval,
        );
        let manager = ConnectionManager::new(transport, settings);
        Self { provider, manager }
    }

    /// Bootstrap credentials and open the connection.
    ///
    /// The explicit initial refresh means a broken identity configuration
    /// fails loudly here instead of as a background log line.
    pub async fn connect(&self) -> ClientResult<()> {
        self.provider.refresh().await?;
        self.manager.connect(&self.provider).await?;
        info!("client connected");
        Ok(())
    }

    pub async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> ClientResult<()> {
        self.manager.publish(topic, payload, qos).await
    }

    pub async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        handler: MessageCallback,
    ) -> ClientResult<()> {
        self.manager.subscribe(topic, qos, handler).await
    }

    /// Disconnect and stop the credential rotation schedule. Idempotent.
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.manager.disconnect().await?;
        self.provider.shutdown();
        info!("client disconnected");
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    /// Out-of-band interruption/failure notices.
    pub fn notices(&self) -> broadcast::Receiver<ConnectionNotice> {
        self.manager.notices()
    }

    /// The credential provider, for callers that want to force a rotation.
    pub fn credentials(&self) -> &CredentialProvider {
        &self.provider
    }
}
