//! Skylink: credential-rotating MQTT-over-websocket pub/sub client
//!
//! A long-lived client that holds a single authenticated publish/subscribe
//! connection to a message broker over websockets, authenticating with
//! short-lived credentials minted by an identity pool and rotated on a
//! background schedule.
//!
//! # Overview
//!
//! Two independently-changing timelines are coupled here: credential
//! validity windows and network connection state. The crate keeps them
//! cooperating by making the credential provider the single authority:
//! connect attempts snapshot it, and the transport holds a live subscription
//! to it so every reconnect is signed with whatever material is current at
//! that moment.
//!
//! - [`credentials`] - rotating provider plus the Cognito identity exchange
//! - [`transport`] - broker seam and the rumqttc websocket implementation
//! - [`connection`] - state machine, pub/sub operations, event multiplexing
//! - [`client`] - the façade applications hold
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use skylink::{ClientConfig, PubSubClient, QoS};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = ClientConfig::load_from_file("skylink.toml")?;
//! let client = PubSubClient::new(&config)?;
//!
//! client.connect().await?;
//! client
//!     .subscribe(
//!         "telemetry/#",
//!         QoS::AtLeastOnce,
//!         Arc::new(|topic, payload| {
//!             println!("{topic}: {} bytes", payload.len());
//!         }),
//!     )
//!     .await?;
//! client.publish("telemetry/pump", b"online", QoS::AtLeastOnce).await?;
//! client.disconnect().await?;
//! # Ok::<(), skylink::ClientError>(())
//! # });
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod observability;
pub mod testing;
pub mod transport;

pub use client::PubSubClient;
pub use config::{ClientConfig, ConfigError};
pub use connection::{ConnectionManager, ConnectionNotice, ConnectionState, MessageCallback};
pub use credentials::{
    cognito::CognitoIdentityExchange, CredentialMaterial, CredentialProvider, CredentialsError,
    IdentityExchange,
};
pub use error::{ClientError, ClientResult};
pub use transport::{ConnectionSettings, QoS, SessionEvent, TransportError, WebSocketMqtt};
