//! MQTT-over-websocket transport backed by rumqttc
//!
//! [`WebSocketMqtt::open`] signs a websocket URL from the config's credential
//! snapshot, starts the rumqttc event loop, and hands back a session handle.
//! A supervisor task translates raw MQTT events into [`SessionEvent`]s and
//! owns reconnection: every retry rebuilds the client from the credential
//! subscription's *current* value, so rotation and reconnection cooperate
//! instead of racing.

use super::options::{mqtt_options, should_attempt_reconnect, ReconnectConfig, ReconnectDecision};
use crate::credentials::CredentialMaterial;
use crate::error::redact_secrets;
use crate::transport::{
    BrokerSession, BrokerTransport, ConnectionConfig, QoS, SessionEvent, TransportError,
};
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Packet};
use rumqttc::v5::mqttbytes::QoS as MqttQoS;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

const EVENT_QUEUE_CAPACITY: usize = 32;

fn map_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

/// Websocket MQTT transport.
pub struct WebSocketMqtt {
    reconnect: ReconnectConfig,
}

impl WebSocketMqtt {
    pub fn new() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect(reconnect: ReconnectConfig) -> Self {
        Self { reconnect }
    }
}

impl Default for WebSocketMqtt {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for WebSocketMqtt {
    async fn open(
        &self,
        config: ConnectionConfig,
        credentials: watch::Receiver<CredentialMaterial>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Arc<dyn BrokerSession>, TransportError> {
        let options = mqtt_options(&config, Utc::now())?;
        let (client, event_loop) = AsyncClient::new(options, EVENT_QUEUE_CAPACITY);
        let shared_client = Arc::new(Mutex::new(client));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Supervisor {
            event_loop,
            shared_client: shared_client.clone(),
            config,
            credentials,
            events,
            reconnect: self.reconnect.clone(),
            shutdown_rx,
            ever_connected: false,
            interrupted: false,
            attempts: 0,
        };
        tokio::spawn(supervisor.run());

        Ok(Arc::new(MqttSession {
            client: shared_client,
            shutdown_tx,
        }))
    }
}

/// Handle to a live session; publish/subscribe go through the shared client,
/// which the supervisor swaps out under reconnection.
struct MqttSession {
    client: Arc<Mutex<AsyncClient>>,
    shutdown_tx: watch::Sender<bool>,
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<(), TransportError> {
        let client = self.client.lock().await;
        client
            .publish(topic, map_qos(qos), false, payload.to_vec())
            .await
            .map_err(|e| TransportError::PublishFailed(Box::new(e)))
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let client = self.client.lock().await;
        client
            .subscribe(topic, map_qos(qos))
            .await
            .map_err(|e| TransportError::SubscribeFailed(Box::new(e)))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // Enqueue the disconnect packet first so the supervisor has a chance
        // to flush it before it sees the shutdown signal.
        let result = {
            let client = self.client.lock().await;
            client.disconnect().await
        };
        self.shutdown_tx.send_replace(true);
        result.map_err(|e| TransportError::DisconnectFailed(Box::new(e)))
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Event-loop driver and reconnection supervisor for one session.
struct Supervisor {
    event_loop: EventLoop,
    shared_client: Arc<Mutex<AsyncClient>>,
    config: ConnectionConfig,
    credentials: watch::Receiver<CredentialMaterial>,
    events: mpsc::Sender<SessionEvent>,
    reconnect: ReconnectConfig,
    shutdown_rx: watch::Receiver<bool>,
    ever_connected: bool,
    interrupted: bool,
    attempts: u32,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        let _ = self.events.send(SessionEvent::Disconnected).await;
                        break;
                    }
                }
                polled = self.event_loop.poll() => {
                    if !self.handle_poll(polled).await {
                        break;
                    }
                }
            }
        }
        debug!("transport supervisor stopped");
    }

    /// Returns false when the supervisor should stop.
    async fn handle_poll(&mut self, polled: Result<Event, ConnectionError>) -> bool {
        match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => self.handle_connack(ack).await,
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let event = SessionEvent::Message {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                };
                self.events.send(event).await.is_ok()
            }
            Ok(Event::Incoming(Packet::Disconnect(_))) => {
                if *self.shutdown_rx.borrow() {
                    let _ = self.events.send(SessionEvent::Disconnected).await;
                    return false;
                }
                // Broker-initiated: recoverable, not terminal.
                self.recover("broker closed the connection".to_string()).await
            }
            Ok(_) => true,
            Err(e) => {
                if *self.shutdown_rx.borrow() {
                    let _ = self.events.send(SessionEvent::Disconnected).await;
                    return false;
                }
                let reason = redact_secrets(&e.to_string());
                if !self.ever_connected {
                    // Initial connect failure: the caller decides whether to
                    // retry; the transport does not.
                    let _ = self.events.send(SessionEvent::Errored { reason }).await;
                    return false;
                }
                self.recover(reason).await
            }
        }
    }

    async fn handle_connack(&mut self, ack: ConnAck) -> bool {
        if ack.code != ConnectReturnCode::Success {
            let reason = format!("broker refused connection: {:?}", ack.code);
            if !self.ever_connected {
                let _ = self.events.send(SessionEvent::Errored { reason }).await;
                return false;
            }
            return self.recover(reason).await;
        }

        self.attempts = 0;
        let event = if self.ever_connected {
            SessionEvent::Resumed {
                return_code: 0,
                session_present: ack.session_present,
            }
        } else {
            self.ever_connected = true;
            SessionEvent::Connected {
                session_present: ack.session_present,
            }
        };
        self.interrupted = false;
        self.events.send(event).await.is_ok()
    }

    /// Interruption path: report once, back off, rebuild from the credential
    /// subscription's current value.
    async fn recover(&mut self, reason: String) -> bool {
        if !self.interrupted {
            self.interrupted = true;
            let event = SessionEvent::Interrupted {
                reason: reason.clone(),
            };
            if self.events.send(event).await.is_err() {
                return false;
            }
        } else {
            debug!("reconnect attempt failed: {reason}");
        }

        let decision =
            should_attempt_reconnect(self.attempts, &self.reconnect, *self.shutdown_rx.borrow());
        match decision {
            ReconnectDecision::Proceed { attempt, delay_ms } => {
                self.attempts = attempt;
                info!(attempt, delay_ms, "scheduling reconnect");
                if !interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
                    let _ = self.events.send(SessionEvent::Disconnected).await;
                    return false;
                }
                self.rebuild_connection().await;
                true
            }
            ReconnectDecision::AbortShutdownRequested => {
                let _ = self.events.send(SessionEvent::Disconnected).await;
                false
            }
            ReconnectDecision::AbortMaxAttemptsExceeded => {
                let reason = format!("reconnect attempts exhausted ({})", self.attempts);
                let _ = self.events.send(SessionEvent::Errored { reason }).await;
                false
            }
        }
    }

    /// Swap in a client/event-loop pair built from the credentials the
    /// provider holds right now, not the ones the session started with.
    async fn rebuild_connection(&mut self) {
        let material = self.credentials.borrow().clone();
        let config = self.config.refreshed(material);
        match mqtt_options(&config, Utc::now()) {
            Ok(options) => {
                let (client, event_loop) = AsyncClient::new(options, EVENT_QUEUE_CAPACITY);
                self.event_loop = event_loop;
                *self.shared_client.lock().await = client;
                debug!("rebuilt connection with current credential material");
            }
            Err(e) => {
                // The stale event loop errors on the next poll and lands back
                // in recover() for another attempt.
                warn!("failed to rebuild connection: {e}");
            }
        }
    }
}

/// Returns false if shutdown was requested during the sleep.
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}
