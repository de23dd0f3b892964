//! Mock identity exchange and broker transport
//!
//! The mock transport is scripted from the outside: tests call
//! [`MockTransport::emit`] to inject lifecycle events and inspect the
//! [`MockSession`] for recorded publish/subscribe calls.

use crate::credentials::{CredentialMaterial, CredentialsError, IdentityExchange};
use crate::transport::{
    BrokerSession, BrokerTransport, ConnectionConfig, QoS, SessionEvent, TransportError,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

/// Identity exchange that mints serial-numbered material.
#[derive(Default)]
pub struct MockIdentityExchange {
    calls: AtomicUsize,
    pub fail: AtomicBool,
    pub delay: Mutex<Option<Duration>>,
}

impl MockIdentityExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityExchange for MockIdentityExchange {
    async fn fetch_temporary_credentials(
        &self,
        _identity_pool_id: &str,
        region: &str,
    ) -> Result<CredentialMaterial, CredentialsError> {
        let serial = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CredentialsError::ExchangeFailed {
                reason: "mock exchange failure".to_string(),
            });
        }
        Ok(CredentialMaterial {
            region: region.to_string(),
            access_key_id: format!("AKID{serial}"),
            secret_access_key: format!("secret{serial}"),
            session_token: format!("token{serial}"),
        })
    }
}

/// Scripted broker transport.
pub struct MockTransport {
    opened_configs: Arc<Mutex<Vec<ConnectionConfig>>>,
    event_tx: Arc<Mutex<Option<mpsc::Sender<SessionEvent>>>>,
    credentials: Arc<Mutex<Option<watch::Receiver<CredentialMaterial>>>>,
    session: Arc<MockSession>,
    pub fail_open: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            opened_configs: Arc::new(Mutex::new(Vec::new())),
            event_tx: Arc::new(Mutex::new(None)),
            credentials: Arc::new(Mutex::new(None)),
            session: Arc::new(MockSession::default()),
            fail_open: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> Arc<MockSession> {
        self.session.clone()
    }

    /// Inject a lifecycle event into the open session. Dropped silently if
    /// the manager has already stopped listening.
    pub async fn emit(&self, event: SessionEvent) {
        let sender = self.event_tx.lock().await.clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    pub async fn opened_configs(&self) -> Vec<ConnectionConfig> {
        self.opened_configs.lock().await.clone()
    }

    /// The credential subscription handed over at `open`, i.e. what a real
    /// transport would consult on every reconnect attempt.
    pub async fn credential_subscription(&self) -> Option<watch::Receiver<CredentialMaterial>> {
        self.credentials.lock().await.clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for MockTransport {
    async fn open(
        &self,
        config: ConnectionConfig,
        credentials: watch::Receiver<CredentialMaterial>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Arc<dyn BrokerSession>, TransportError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(TransportError::OpenFailed(
                "mock open failure".to_string().into(),
            ));
        }
        self.opened_configs.lock().await.push(config);
        *self.event_tx.lock().await = Some(events);
        *self.credentials.lock().await = Some(credentials);
        Ok(self.session.clone())
    }
}

/// Recording session handle.
#[derive(Default)]
pub struct MockSession {
    published: Mutex<Vec<(String, Vec<u8>, QoS)>>,
    subscribed: Mutex<Vec<(String, QoS)>>,
    disconnect_calls: AtomicUsize,
    pub fail_publish: AtomicBool,
    pub publish_delay: Mutex<Option<Duration>>,
}

impl MockSession {
    pub async fn published(&self) -> Vec<(String, Vec<u8>, QoS)> {
        self.published.lock().await.clone()
    }

    pub async fn subscribed(&self) -> Vec<(String, QoS)> {
        self.subscribed.lock().await.clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerSession for MockSession {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError> {
        let delay = *self.publish_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed(
                "mock publish failure".to_string().into(),
            ));
        }
        self.published
            .lock()
            .await
            .push((topic.to_string(), payload.to_vec(), qos));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.subscribed.lock().await.push((topic.to_string(), qos));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
