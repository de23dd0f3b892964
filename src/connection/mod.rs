//! Connection manager: state machine, pub/sub operations, event multiplexing
//!
//! The manager owns the session handle and a single event-processing task.
//! Lifecycle events are handled strictly one at a time, in the order the
//! transport emitted them, which is what makes the re-subscribe-on-session-
//! loss guarantee hold: subscriptions are re-issued before any later event
//! (hence any later message) gets processed.
//!
//! Operations attempted outside the `Connected` state fail fast with
//! `NotConnected`; nothing is queued. This is the documented default;
//! callers that want queueing retry on the notice channel's `Resumed` signal.

pub mod routing;
pub mod state;

use crate::credentials::CredentialProvider;
use crate::error::{ClientError, ClientResult};
use crate::transport::{
    BrokerSession, BrokerTransport, ConnectionConfig, ConnectionSettings, QoS, SessionEvent,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub use state::ConnectionState;

const EVENT_CHANNEL_CAPACITY: usize = 32;
const NOTICE_CHANNEL_CAPACITY: usize = 32;

/// Callback invoked once per inbound message matching a subscription.
/// Receives the concrete topic and the raw payload bytes; decoding is the
/// caller's business.
pub type MessageCallback = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// A registered subscription, held for the life of the connection.
#[derive(Clone)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
    handler: MessageCallback,
}

/// Out-of-band connection events for observers. Recoverable conditions
/// (interruptions) and post-connect failures are reported here rather than
/// as errors on unrelated calls.
#[derive(Debug, Clone)]
pub enum ConnectionNotice {
    Interrupted { reason: String },
    Resumed { session_present: bool },
    Failed { reason: String },
    Disconnected,
}

/// Drives connection establishment and exposes publish/subscribe/disconnect.
pub struct ConnectionManager {
    transport: Arc<dyn BrokerTransport>,
    settings: ConnectionSettings,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    subscriptions: Arc<Mutex<HashMap<String, Subscription>>>,
    session: Arc<Mutex<Option<Arc<dyn BrokerSession>>>>,
    notice_tx: broadcast::Sender<ConnectionNotice>,
    shutdown_tx: watch::Sender<bool>,
    disconnect_requested: Arc<AtomicBool>,
    event_task: StdMutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn BrokerTransport>, settings: ConnectionSettings) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (notice_tx, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            transport,
            settings,
            state_tx,
            state_rx,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            session: Arc::new(Mutex::new(None)),
            notice_tx,
            shutdown_tx,
            disconnect_requested: Arc::new(AtomicBool::new(false)),
            event_task: StdMutex::new(None),
        }
    }

    /// Open the connection using the provider's current material.
    ///
    /// The first config is built from `provider.snapshot()`; the transport
    /// additionally gets the provider's update subscription so reconnect
    /// attempts use whatever material is current *then*. Resolves once the
    /// transport reports the first successful connection; fails with
    /// `Connect` if it errors before that.
    pub async fn connect(&self, provider: &CredentialProvider) -> ClientResult<()> {
        {
            let current = self.state_rx.borrow().clone();
            if matches!(
                current,
                ConnectionState::Connecting
                    | ConnectionState::Connected
                    | ConnectionState::Interrupted
            ) {
                return Err(ClientError::Connect {
                    reason: format!("connection already active (state: {current:?})"),
                });
            }
        }

        self.disconnect_requested.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(false);

        let material = provider.snapshot();
        if material.is_placeholder() {
            warn!("connecting with unrefreshed credential material");
        }
        let config = ConnectionConfig::build(&material, &self.settings)?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.state_tx.send_replace(ConnectionState::Connecting);

        let session = match self
            .transport
            .open(config, provider.subscribe_to_updates(), event_tx)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                let reason = e.to_string();
                self.state_tx
                    .send_replace(ConnectionState::Failed(reason.clone()));
                return Err(ClientError::Connect { reason });
            }
        };
        *self.session.lock().await = Some(session);

        let task = tokio::spawn(run_event_loop(EventLoopCtx {
            events: event_rx,
            state_tx: self.state_tx.clone(),
            subscriptions: self.subscriptions.clone(),
            session: self.session.clone(),
            notice_tx: self.notice_tx.clone(),
            disconnect_requested: self.disconnect_requested.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
        }));
        if let Some(previous) = self.event_task.lock().unwrap().replace(task) {
            previous.abort();
        }

        self.await_first_connection().await
    }

    /// Block until the first lifecycle event settles the connect attempt.
    async fn await_first_connection(&self) -> ClientResult<()> {
        let mut state_rx = self.state_rx.clone();
        let settled = tokio::time::timeout(
            self.settings.connect_timeout,
            state_rx.wait_for(|s| !matches!(s, ConnectionState::Connecting)),
        )
        .await;

        match settled {
            Err(_) => Err(ClientError::Connect {
                reason: format!(
                    "no connection confirmation within {:?}",
                    self.settings.connect_timeout
                ),
            }),
            Ok(Err(_)) => Err(ClientError::Connect {
                reason: "connection state channel closed".to_string(),
            }),
            Ok(Ok(settled_state)) => match &*settled_state {
                ConnectionState::Connected => Ok(()),
                ConnectionState::Failed(reason) => Err(ClientError::Connect {
                    reason: reason.clone(),
                }),
                ConnectionState::Disconnected => Err(ClientError::Disconnected),
                other => Err(ClientError::Connect {
                    reason: format!("unexpected state during connect: {other:?}"),
                }),
            },
        }
    }

    /// Publish one message. Valid only while `Connected`; resolves per the
    /// requested QoS contract, or with `Disconnected` if `disconnect()` lands
    /// first.
    pub async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> ClientResult<()> {
        let current = self.state_rx.borrow().clone();
        if !state::can_publish(&current) {
            return Err(ClientError::NotConnected { state: current });
        }
        let session = self.current_session().await?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            result = session.publish(topic, payload, qos) => Ok(result?),
            _ = shutdown_signalled(&mut shutdown_rx) => Err(ClientError::Disconnected),
        }
    }

    /// Register a subscription and its handler. The subscription persists
    /// across interruptions; on session loss it is re-issued by the manager
    /// before further message delivery.
    pub async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
        handler: MessageCallback,
    ) -> ClientResult<()> {
        let current = self.state_rx.borrow().clone();
        if !state::can_subscribe(&current) {
            return Err(ClientError::NotConnected { state: current });
        }
        let session = self.current_session().await?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            result = session.subscribe(topic, qos) => result?,
            _ = shutdown_signalled(&mut shutdown_rx) => return Err(ClientError::Disconnected),
        }

        self.subscriptions.lock().await.insert(
            topic.to_string(),
            Subscription {
                topic: topic.to_string(),
                qos,
                handler,
            },
        );
        debug!(topic, "subscription registered");
        Ok(())
    }

    /// Clean shutdown. Idempotent: the second and later calls are no-ops.
    /// Cancels pending publish/subscribe calls with `Disconnected` before
    /// tearing down the session.
    pub async fn disconnect(&self) -> ClientResult<()> {
        if self.disconnect_requested.swap(true, Ordering::SeqCst) {
            debug!("disconnect already requested");
            return Ok(());
        }

        // Release pending operations first so nothing waits on a session
        // that is about to go away.
        self.shutdown_tx.send_replace(true);

        let session = self.session.lock().await.take();
        if let Some(session) = session {
            if let Err(e) = session.disconnect().await {
                // Best effort: the session may already be gone.
                warn!("disconnect: {e}");
            }
        }
        self.subscriptions.lock().await.clear();
        self.state_tx.send_replace(ConnectionState::Disconnected);
        let _ = self.notice_tx.send(ConnectionNotice::Disconnected);

        let task = self.event_task.lock().unwrap().take();
        if let Some(task) = task {
            match tokio::time::timeout(Duration::from_secs(2), task).await {
                Ok(Ok(())) => debug!("event loop stopped"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("event loop ended with error: {e}"),
                Err(_) => warn!("event loop did not stop in time"),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Subscribe to out-of-band interruption/failure notices.
    pub fn notices(&self) -> broadcast::Receiver<ConnectionNotice> {
        self.notice_tx.subscribe()
    }

    async fn current_session(&self) -> ClientResult<Arc<dyn BrokerSession>> {
        self.session
            .lock()
            .await
            .clone()
            .ok_or_else(|| ClientError::NotConnected {
                state: self.state(),
            })
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.event_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

async fn shutdown_signalled(shutdown_rx: &mut watch::Receiver<bool>) {
    // A closed channel means the manager is gone; treat it as a shutdown.
    let _ = shutdown_rx.wait_for(|requested| *requested).await;
}

struct EventLoopCtx {
    events: mpsc::Receiver<SessionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    subscriptions: Arc<Mutex<HashMap<String, Subscription>>>,
    session: Arc<Mutex<Option<Arc<dyn BrokerSession>>>>,
    notice_tx: broadcast::Sender<ConnectionNotice>,
    disconnect_requested: Arc<AtomicBool>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Single consumer of the transport's event stream; one event at a time.
async fn run_event_loop(mut ctx: EventLoopCtx) {
    loop {
        tokio::select! {
            _ = ctx.shutdown_rx.changed() => {
                if *ctx.shutdown_rx.borrow() {
                    break;
                }
            }
            event = ctx.events.recv() => {
                let Some(event) = event else { break };
                if !process_event(&mut ctx, event).await {
                    break;
                }
            }
        }
    }
    debug!("connection event loop stopped");
}

/// Returns false when the event loop should stop.
async fn process_event(ctx: &mut EventLoopCtx, event: SessionEvent) -> bool {
    if let SessionEvent::Message {
        topic,
        payload,
        retain,
    } = &event
    {
        if *retain {
            debug!(topic = %topic, "delivering retained message");
        }
        dispatch_message(&ctx.subscriptions, topic, payload).await;
        return true;
    }

    // Re-issue subscriptions before the state flips back to Connected so no
    // message can arrive against a lost broker session.
    if let SessionEvent::Resumed {
        session_present: false,
        ..
    } = &event
    {
        resubscribe_all(&ctx.subscriptions, &ctx.session).await;
    }

    let requested = ctx.disconnect_requested.load(Ordering::SeqCst);
    let previous = ctx.state_tx.borrow().clone();
    let next = state::apply_event(&previous, &event, requested);
    state::log_state_transition(&previous, &next);
    ctx.state_tx.send_replace(next);

    match event {
        SessionEvent::Interrupted { reason } => {
            let _ = ctx.notice_tx.send(ConnectionNotice::Interrupted { reason });
            true
        }
        SessionEvent::Resumed {
            session_present, ..
        } => {
            let _ = ctx.notice_tx.send(ConnectionNotice::Resumed { session_present });
            true
        }
        SessionEvent::Errored { reason } => {
            let _ = ctx.notice_tx.send(ConnectionNotice::Failed { reason });
            false
        }
        SessionEvent::Disconnected if requested => {
            let _ = ctx.notice_tx.send(ConnectionNotice::Disconnected);
            false
        }
        _ => true,
    }
}

async fn dispatch_message(
    subscriptions: &Arc<Mutex<HashMap<String, Subscription>>>,
    topic: &str,
    payload: &[u8],
) {
    let subscriptions = subscriptions.lock().await;
    for subscription in subscriptions.values() {
        if routing::topic_matches(&subscription.topic, topic) {
            (subscription.handler)(topic, payload);
        }
    }
}

async fn resubscribe_all(
    subscriptions: &Arc<Mutex<HashMap<String, Subscription>>>,
    session: &Arc<Mutex<Option<Arc<dyn BrokerSession>>>>,
) {
    let session = session.lock().await.clone();
    let Some(session) = session else {
        return;
    };
    let subscriptions = subscriptions.lock().await;
    for subscription in subscriptions.values() {
        match session
            .subscribe(&subscription.topic, subscription.qos)
            .await
        {
            Ok(()) => debug!(topic = %subscription.topic, "re-subscribed after session loss"),
            Err(e) => error!(topic = %subscription.topic, "failed to re-subscribe: {e}"),
        }
    }
}
