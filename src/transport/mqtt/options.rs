//! MQTT option construction and reconnect policy
//!
//! Pure helpers shared by the initial connect and every reconnect attempt:
//! turning a [`ConnectionConfig`] into `rumqttc` options with a freshly
//! signed websocket URL, and deciding how long to back off between attempts.

use super::signing::presign_websocket_url;
use crate::transport::{ConnectionConfig, TransportError};
use chrono::{DateTime, Utc};
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as WireTransport;
use url::Url;

/// Reconnection policy for the supervisor.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited).
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds; after it is exhausted the sustained
    /// delay applies.
    pub backoff_pattern: Vec<u64>,
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![500, 1000, 2000, 4000],
            sustained_delay: 4000,
        }
    }
}

impl ReconnectConfig {
    pub fn backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        *self
            .backoff_pattern
            .get(index)
            .unwrap_or(&self.sustained_delay)
    }
}

/// Decision for one reconnection attempt.
#[derive(Debug, PartialEq)]
pub enum ReconnectDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded,
}

pub fn should_attempt_reconnect(
    current_attempts: u32,
    config: &ReconnectConfig,
    shutdown_requested: bool,
) -> ReconnectDecision {
    if shutdown_requested {
        return ReconnectDecision::AbortShutdownRequested;
    }
    if let Some(max) = config.max_attempts {
        if current_attempts >= max {
            return ReconnectDecision::AbortMaxAttemptsExceeded;
        }
    }
    ReconnectDecision::Proceed {
        attempt: current_attempts + 1,
        delay_ms: config.backoff_delay(current_attempts + 1),
    }
}

/// Build `rumqttc` options for one connect attempt.
///
/// Signs the websocket URL with the config's credential snapshot at `at`;
/// reconnect attempts call this again with a refreshed config so the URL
/// never outlives its credentials.
pub fn mqtt_options(
    config: &ConnectionConfig,
    at: DateTime<Utc>,
) -> Result<MqttOptions, TransportError> {
    // The endpoint must be a bare hostname; scheme, port, and path are owned
    // by the signed URL.
    let probe = Url::parse(&format!("wss://{}", config.endpoint))
        .map_err(|_| TransportError::InvalidEndpoint(config.endpoint.clone()))?;
    if probe.host_str() != Some(config.endpoint.as_str()) || probe.port().is_some() {
        return Err(TransportError::InvalidEndpoint(config.endpoint.clone()));
    }

    let url = presign_websocket_url(&config.endpoint, &config.credentials, at)?;

    // For websocket transport rumqttc takes the full URL as the broker
    // address; the port argument is part of the signature but unused.
    let mut options = MqttOptions::new(config.client_id.clone(), url, 443);
    options.set_transport(WireTransport::wss_with_default_config());
    options.set_keep_alive(config.keep_alive);
    options.set_clean_start(config.clean_session);
    Ok(options)
}
