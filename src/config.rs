//! Client configuration
//!
//! TOML file with `[broker]` and `[identity]` sections, plus environment
//! overrides for deployments that do not ship a file. Values are opaque
//! strings validated only for non-emptiness; the broker and identity
//! services are the authorities on whether they mean anything.

use crate::credentials::ProviderOptions;
use crate::transport::ConnectionSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub broker: BrokerSection,
    pub identity: IdentitySection,
}

/// Broker connection section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Websocket endpoint hostname, e.g. `xxxx.iot.us-east-1.amazonaws.com`.
    pub endpoint: String,
    /// Client id presented to the broker; generated if absent.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Identity provider section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentitySection {
    /// Identity pool id, e.g. `us-east-1:0f1c...`.
    pub identity_pool_id: String,
    pub region: String,
    /// Credential rotation interval in seconds (default: 1 hour).
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

fn default_client_id() -> String {
    format!("skylink-{}", Uuid::new_v4())
}

fn default_clean_session() -> bool {
    true
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_refresh_interval_secs() -> u64 {
    3600
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ClientConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: ClientConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from `SKYLINK_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = require_env("SKYLINK_ENDPOINT")?;
        let identity_pool_id = require_env("SKYLINK_IDENTITY_POOL_ID")?;
        let region = require_env("SKYLINK_REGION")?;

        let config = ClientConfig {
            broker: BrokerSection {
                endpoint,
                client_id: std::env::var("SKYLINK_CLIENT_ID")
                    .unwrap_or_else(|_| default_client_id()),
                clean_session: default_clean_session(),
                keep_alive_secs: default_keep_alive_secs(),
                connect_timeout_secs: default_connect_timeout_secs(),
            },
            identity: IdentitySection {
                identity_pool_id,
                region,
                refresh_interval_secs: default_refresh_interval_secs(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.endpoint is empty".to_string()));
        }
        if self.broker.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("broker.client_id is empty".to_string()));
        }
        if self.identity.identity_pool_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "identity.identity_pool_id is empty".to_string(),
            ));
        }
        if self.identity.region.trim().is_empty() {
            return Err(ConfigError::Invalid("identity.region is empty".to_string()));
        }
        if self.identity.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "identity.refresh_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            endpoint: self.broker.endpoint.clone(),
            client_id: self.broker.client_id.clone(),
            clean_session: self.broker.clean_session,
            keep_alive: Duration::from_secs(self.broker.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.broker.connect_timeout_secs),
        }
    }

    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            identity_pool_id: self.identity.identity_pool_id.clone(),
            region: self.identity.region.clone(),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.identity.refresh_interval_secs)
    }
}

fn require_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Invalid(format!("{name} is not set")))
}
