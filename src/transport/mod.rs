//! Transport layer for the pub/sub connection
//!
//! This module defines the seam between the connection manager and the
//! broker: a transport opens a session from an immutable [`ConnectionConfig`]
//! plus a live credential subscription, and reports everything that happens
//! afterwards as an ordered stream of [`SessionEvent`]s. The MQTT-over-
//! websocket implementation lives in [`mqtt`].

use crate::config::ConfigError;
use crate::credentials::CredentialMaterial;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

pub mod mqtt;

pub use mqtt::WebSocketMqtt;

/// Delivery guarantee for a published or subscribed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    /// Fire and forget.
    AtMostOnce,
    /// Transport retries until acknowledged.
    AtLeastOnce,
    /// Transport deduplicates.
    ExactlyOnce,
}

/// Static connection parameters, fixed for the life of the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Broker websocket endpoint (hostname, no scheme).
    pub endpoint: String,
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: Duration,
    /// How long `connect()` waits for the first lifecycle event before
    /// giving up.
    pub connect_timeout: Duration,
}

/// Immutable configuration for one connect attempt: the static settings plus
/// a copy of the credential material that was current when it was built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub credentials: CredentialMaterial,
}

impl ConnectionConfig {
    /// Combine credential material with static settings.
    ///
    /// Pure and deterministic: identical inputs produce an identical config.
    /// The material is carried as-is even if near expiry; refreshing before
    /// a fresh connect is the caller's job, and reconnects consult the
    /// provider again anyway.
    pub fn build(
        material: &CredentialMaterial,
        settings: &ConnectionSettings,
    ) -> Result<Self, ConfigError> {
        if settings.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("broker endpoint is empty".to_string()));
        }
        if settings.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("client id is empty".to_string()));
        }
        Ok(Self {
            endpoint: settings.endpoint.clone(),
            client_id: settings.client_id.clone(),
            clean_session: settings.clean_session,
            keep_alive: settings.keep_alive,
            credentials: material.clone(),
        })
    }

    /// The same configuration with newer credential material, for reconnect
    /// attempts.
    pub fn refreshed(&self, material: CredentialMaterial) -> Self {
        Self {
            credentials: material,
            ..self.clone()
        }
    }
}

/// Everything a live session can report back, in the order the transport
/// observed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// First successful connection of this session.
    Connected { session_present: bool },
    /// Connection lost; the transport is retrying with fresh credentials.
    Interrupted { reason: String },
    /// Connection re-established after an interruption.
    Resumed { return_code: u8, session_present: bool },
    /// Session ended after an explicit disconnect request.
    Disconnected,
    /// Unrecoverable failure; the transport has stopped retrying.
    Errored { reason: String },
    /// Inbound message on a subscribed topic.
    Message {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open connection")]
    OpenFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("publish failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("subscribe failed")]
    SubscribeFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Factory for broker sessions.
///
/// `open` receives the first connect attempt's config and a live credential
/// subscription; every later reconnect attempt inside the transport rebuilds
/// its configuration from the subscription's current value, never from the
/// original snapshot.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn open(
        &self,
        config: ConnectionConfig,
        credentials: watch::Receiver<CredentialMaterial>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Arc<dyn BrokerSession>, TransportError>;
}

/// Operations on an open session.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError>;
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}
