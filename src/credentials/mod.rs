//! Rotating credential provisioning for the websocket transport
//!
//! The broker only accepts short-lived credentials minted by an external
//! identity provider, so the provider here owns two jobs: hand out the
//! current material synchronously, and keep it fresh on a background
//! schedule that outside callers never have to think about.
//!
//! Readers get the material through [`CredentialProvider::snapshot`] (a
//! whole-value copy, never a half-written record) or through
//! [`CredentialProvider::subscribe_to_updates`], which is what the transport
//! holds onto so reconnect attempts pick up rotated credentials instead of a
//! frozen snapshot.

pub mod cognito;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Default rotation interval: one hour, matching the typical lifetime of
/// identity-pool credentials.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

/// Temporary authentication material for one connection attempt.
///
/// Replaced wholesale on every refresh; never mutated field-by-field.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialMaterial {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

impl CredentialMaterial {
    /// Initial placeholder carried between construction and the first
    /// successful refresh. Only the region is known at that point.
    pub fn placeholder(region: &str) -> Self {
        Self {
            region: region.to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: String::new(),
        }
    }

    /// True until the first successful exchange has filled in the material.
    pub fn is_placeholder(&self) -> bool {
        self.access_key_id.is_empty()
    }
}

// Secret fields must not leak through Debug formatting in logs or errors.
impl fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &"***")
            .finish()
    }
}

/// Errors from the identity exchange.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("credential exchange failed: {reason}")]
    ExchangeFailed { reason: String },
    #[error("identity response missing field: {0}")]
    MissingField(&'static str),
}

/// One-operation interface to the external identity provider.
///
/// Implementations own the wire protocol; the provider only cares that it
/// gets back a complete [`CredentialMaterial`] or a failure it can log and
/// retry on the next tick.
#[async_trait]
pub trait IdentityExchange: Send + Sync {
    async fn fetch_temporary_credentials(
        &self,
        identity_pool_id: &str,
        region: &str,
    ) -> Result<CredentialMaterial, CredentialsError>;
}

/// Static identity configuration for a provider instance.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub identity_pool_id: String,
    pub region: String,
}

/// Owns the current credential material and the background refresh schedule.
///
/// At most one exchange is in flight at a time: scheduled ticks that find a
/// refresh already running are skipped, and explicit [`refresh`] callers
/// serialize behind the same gate. A failed tick leaves the previous material
/// in place and does not cancel future ticks.
///
/// [`refresh`]: CredentialProvider::refresh
pub struct CredentialProvider {
    options: ProviderOptions,
    exchange: Arc<dyn IdentityExchange>,
    material_tx: watch::Sender<CredentialMaterial>,
    material_rx: watch::Receiver<CredentialMaterial>,
    refresh_gate: Arc<Mutex<()>>,
    shutdown_tx: watch::Sender<bool>,
    refresh_task: JoinHandle<()>,
}

impl CredentialProvider {
    /// Create the provider and start its refresh schedule.
    ///
    /// The schedule first fires one `refresh_interval` after construction;
    /// bootstrap code is expected to call [`refresh`] once explicitly before
    /// the first connect so failures surface to the caller instead of a log
    /// line.
    ///
    /// [`refresh`]: CredentialProvider::refresh
    pub fn start(
        exchange: Arc<dyn IdentityExchange>,
        options: ProviderOptions,
        refresh_interval: Duration,
    ) -> Self {
        let placeholder = CredentialMaterial::placeholder(&options.region);
        let (material_tx, material_rx) = watch::channel(placeholder);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let refresh_gate = Arc::new(Mutex::new(()));

        let refresh_task = tokio::spawn(run_refresh_schedule(
            exchange.clone(),
            options.clone(),
            material_tx.clone(),
            refresh_gate.clone(),
            refresh_interval,
            shutdown_rx,
        ));

        Self {
            options,
            exchange,
            material_tx,
            material_rx,
            refresh_gate,
            shutdown_tx,
            refresh_task,
        }
    }

    /// Most recently refreshed material. Never blocks, never refreshes.
    pub fn snapshot(&self) -> CredentialMaterial {
        self.material_rx.borrow().clone()
    }

    /// Live handle to the material, for components that must consult the
    /// provider again later (the transport, at reconnect time) rather than
    /// hold a snapshot that rotation would silently invalidate.
    pub fn subscribe_to_updates(&self) -> watch::Receiver<CredentialMaterial> {
        self.material_rx.clone()
    }

    /// Perform one exchange with the identity source.
    ///
    /// On success the material is atomically replaced and returned; on
    /// failure it is left untouched. Serializes with the background schedule
    /// so there is never more than one exchange in flight.
    pub async fn refresh(&self) -> Result<CredentialMaterial, CredentialsError> {
        let _gate = self.refresh_gate.lock().await;
        let material = self
            .exchange
            .fetch_temporary_credentials(&self.options.identity_pool_id, &self.options.region)
            .await?;
        self.material_tx.send_replace(material.clone());
        debug!(region = %material.region, "credential material refreshed");
        Ok(material)
    }

    /// Stop the background refresh schedule. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

impl Drop for CredentialProvider {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        self.refresh_task.abort();
    }
}

/// Background refresh loop: one tick per interval, skipped when an exchange
/// is already running, stopped only by shutdown.
async fn run_refresh_schedule(
    exchange: Arc<dyn IdentityExchange>,
    options: ProviderOptions,
    material_tx: watch::Sender<CredentialMaterial>,
    refresh_gate: Arc<Mutex<()>>,
    refresh_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + refresh_interval, refresh_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!("credential refresh schedule stopped");
                    break;
                }
            }
            _ = ticker.tick() => {
                // A tick that lands while another refresh is running is
                // dropped rather than queued.
                let Ok(_gate) = refresh_gate.try_lock() else {
                    debug!("credential refresh already in flight, skipping tick");
                    continue;
                };
                match exchange
                    .fetch_temporary_credentials(&options.identity_pool_id, &options.region)
                    .await
                {
                    Ok(material) => {
                        material_tx.send_replace(material);
                        debug!("scheduled credential refresh completed");
                    }
                    Err(e) => {
                        // Non-fatal: previous material stays valid until the
                        // next tick gets a chance.
                        warn!("scheduled credential refresh failed: {e}");
                    }
                }
            }
        }
    }
}
