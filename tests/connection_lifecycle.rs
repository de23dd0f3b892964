//! Integration tests for the connection manager
//!
//! Drives the full lifecycle against the scripted mock transport:
//! connect/reject paths, interruption and resumption, session-loss
//! re-subscription, fail-fast operations, and disconnect cancellation.

use skylink::connection::ConnectionManager;
use skylink::credentials::{CredentialProvider, ProviderOptions};
use skylink::testing::mocks::{MockIdentityExchange, MockTransport};
use skylink::{ClientError, ConnectionNotice, ConnectionSettings, ConnectionState, QoS, SessionEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn test_settings() -> ConnectionSettings {
    ConnectionSettings {
        endpoint: "example.iot.us-east-1.amazonaws.com".to_string(),
        client_id: "test-client".to_string(),
        clean_session: true,
        keep_alive: Duration::from_secs(30),
        connect_timeout: Duration::from_secs(5),
    }
}

async fn test_provider() -> CredentialProvider {
    let provider = CredentialProvider::start(
        Arc::new(MockIdentityExchange::new()),
        ProviderOptions {
            identity_pool_id: "us-east-1:pool".to_string(),
            region: "us-east-1".to_string(),
        },
        Duration::from_secs(3600),
    );
    provider.refresh().await.unwrap();
    provider
}

/// Emit `event` once the transport has been opened.
fn emit_when_open(transport: &Arc<MockTransport>, event: SessionEvent) {
    let transport = transport.clone();
    tokio::spawn(async move {
        while transport.opened_configs().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        transport.emit(event).await;
    });
}

async fn wait_for_state(manager: &ConnectionManager, wanted: ConnectionState) {
    let mut state_rx = manager.watch_state();
    tokio::time::timeout(Duration::from_secs(2), state_rx.wait_for(|s| *s == wanted))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

async fn connected_manager() -> (ConnectionManager, Arc<MockTransport>, CredentialProvider) {
    let transport = Arc::new(MockTransport::new());
    let provider = test_provider().await;
    let manager = ConnectionManager::new(transport.clone(), test_settings());

    emit_when_open(
        &transport,
        SessionEvent::Connected {
            session_present: true,
        },
    );
    manager.connect(&provider).await.unwrap();
    (manager, transport, provider)
}

#[tokio::test]
async fn test_connect_resolves_on_connected_event() {
    let (manager, _transport, _provider) = connected_manager().await;
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_rejects_when_transport_errors_first() {
    let transport = Arc::new(MockTransport::new());
    let provider = test_provider().await;
    let manager = ConnectionManager::new(transport.clone(), test_settings());

    emit_when_open(
        &transport,
        SessionEvent::Errored {
            reason: "handshake refused".to_string(),
        },
    );
    let result = manager.connect(&provider).await;

    match result {
        Err(ClientError::Connect { reason }) => assert!(reason.contains("handshake refused")),
        other => panic!("expected Connect error, got {other:?}"),
    }
    assert_eq!(
        manager.state(),
        ConnectionState::Failed("handshake refused".to_string())
    );
}

#[tokio::test]
async fn test_connect_fails_fast_when_open_fails() {
    let transport = Arc::new(MockTransport::new());
    transport
        .fail_open
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let provider = test_provider().await;
    let manager = ConnectionManager::new(transport, test_settings());

    assert!(matches!(
        manager.connect(&provider).await,
        Err(ClientError::Connect { .. })
    ));
}

#[tokio::test]
async fn test_publish_fails_fast_before_connect() {
    let transport = Arc::new(MockTransport::new());
    let manager = ConnectionManager::new(transport, test_settings());

    let result = manager.publish("t", b"payload", QoS::AtLeastOnce).await;
    assert!(matches!(
        result,
        Err(ClientError::NotConnected {
            state: ConnectionState::Idle
        })
    ));
}

#[tokio::test]
async fn test_publish_fails_fast_while_connecting() {
    let transport = Arc::new(MockTransport::new());
    let provider = test_provider().await;
    let manager = Arc::new(ConnectionManager::new(transport.clone(), test_settings()));

    let connecting = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect(&provider).await })
    };

    let mut state_rx = manager.watch_state();
    tokio::time::timeout(
        Duration::from_secs(2),
        state_rx.wait_for(|s| *s == ConnectionState::Connecting),
    )
    .await
    .unwrap()
    .unwrap();

    let result = manager.publish("t", b"early", QoS::AtLeastOnce).await;
    assert!(matches!(
        result,
        Err(ClientError::NotConnected {
            state: ConnectionState::Connecting
        })
    ));

    // Let the pending connect complete so the task does not just time out.
    emit_when_open(
        &transport,
        SessionEvent::Connected {
            session_present: true,
        },
    );
    connecting.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_publish_reaches_session_when_connected() {
    let (manager, transport, _provider) = connected_manager().await;

    manager
        .publish("telemetry/pump", b"online", QoS::AtLeastOnce)
        .await
        .unwrap();

    let published = transport.session().published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "telemetry/pump");
    assert_eq!(published[0].1, b"online".to_vec());
    assert_eq!(published[0].2, QoS::AtLeastOnce);
}

#[tokio::test]
async fn test_publish_fails_fast_while_interrupted() {
    let (manager, transport, _provider) = connected_manager().await;

    transport
        .emit(SessionEvent::Interrupted {
            reason: "socket closed".to_string(),
        })
        .await;
    wait_for_state(&manager, ConnectionState::Interrupted).await;

    let result = manager.publish("t", b"x", QoS::AtMostOnce).await;
    assert!(matches!(
        result,
        Err(ClientError::NotConnected {
            state: ConnectionState::Interrupted
        })
    ));
}

#[tokio::test]
async fn test_subscribe_dispatches_matching_message_once() {
    let (manager, transport, _provider) = connected_manager().await;

    let received: Arc<Mutex<Vec<(String, Vec<u8>)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    manager
        .subscribe(
            "t",
            QoS::AtLeastOnce,
            Arc::new(move |topic, payload| {
                sink.lock().unwrap().push((topic.to_string(), payload.to_vec()));
            }),
        )
        .await
        .unwrap();

    let payload = vec![0x7b, 0x22, 0x6d, 0x22, 0x3a, 0x31, 0x7d];
    transport
        .emit(SessionEvent::Message {
            topic: "t".to_string(),
            payload: payload.clone(),
            retain: false,
        })
        .await;
    // A non-matching topic must not reach the handler.
    transport
        .emit(SessionEvent::Message {
            topic: "other".to_string(),
            payload: vec![0x00],
            retain: false,
        })
        .await;

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if !received.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("handler was never invoked");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], ("t".to_string(), payload));
}

#[tokio::test]
async fn test_subscriptions_reissued_on_session_loss_before_delivery() {
    let (manager, transport, _provider) = connected_manager().await;

    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    manager
        .subscribe(
            "telemetry/#",
            QoS::AtLeastOnce,
            Arc::new(move |topic, _| sink.lock().unwrap().push(topic.to_string())),
        )
        .await
        .unwrap();
    assert_eq!(transport.session().subscribed().await.len(), 1);

    transport
        .emit(SessionEvent::Interrupted {
            reason: "socket closed".to_string(),
        })
        .await;
    transport
        .emit(SessionEvent::Resumed {
            return_code: 0,
            session_present: false,
        })
        .await;
    transport
        .emit(SessionEvent::Message {
            topic: "telemetry/pump".to_string(),
            payload: b"42".to_vec(),
            retain: false,
        })
        .await;

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if !received.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("message was never delivered");

    // Events are processed in order, so by the time the message reached the
    // handler the subscription had been re-issued.
    let subscribed = transport.session().subscribed().await;
    assert_eq!(subscribed.len(), 2);
    assert_eq!(subscribed[1].0, "telemetry/#");
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_resume_with_session_present_does_not_resubscribe() {
    let (manager, transport, _provider) = connected_manager().await;

    manager
        .subscribe("t", QoS::AtLeastOnce, Arc::new(|_, _| {}))
        .await
        .unwrap();

    transport
        .emit(SessionEvent::Interrupted {
            reason: "blip".to_string(),
        })
        .await;
    wait_for_state(&manager, ConnectionState::Interrupted).await;
    transport
        .emit(SessionEvent::Resumed {
            return_code: 0,
            session_present: true,
        })
        .await;
    wait_for_state(&manager, ConnectionState::Connected).await;

    assert_eq!(transport.session().subscribed().await.len(), 1);
}

#[tokio::test]
async fn test_unsolicited_disconnect_is_an_interruption() {
    let (manager, transport, _provider) = connected_manager().await;

    transport.emit(SessionEvent::Disconnected).await;
    wait_for_state(&manager, ConnectionState::Interrupted).await;
}

#[tokio::test]
async fn test_post_connect_error_transitions_to_failed() {
    let (manager, transport, _provider) = connected_manager().await;
    let mut notices = manager.notices();

    transport
        .emit(SessionEvent::Errored {
            reason: "reconnect attempts exhausted".to_string(),
        })
        .await;
    wait_for_state(
        &manager,
        ConnectionState::Failed("reconnect attempts exhausted".to_string()),
    )
    .await;

    let notice = tokio::time::timeout(Duration::from_secs(2), notices.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(notice, ConnectionNotice::Failed { .. }));
}

#[tokio::test]
async fn test_interruption_reported_as_notice_not_error() {
    let (manager, transport, _provider) = connected_manager().await;
    let mut notices = manager.notices();

    transport
        .emit(SessionEvent::Interrupted {
            reason: "socket closed".to_string(),
        })
        .await;

    let notice = tokio::time::timeout(Duration::from_secs(2), notices.recv())
        .await
        .unwrap()
        .unwrap();
    match notice {
        ConnectionNotice::Interrupted { reason } => assert_eq!(reason, "socket closed"),
        other => panic!("expected Interrupted notice, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (manager, transport, _provider) = connected_manager().await;

    manager.disconnect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    // Second call is a no-op, not an error.
    manager.disconnect().await.unwrap();
    assert_eq!(transport.session().disconnect_calls(), 1);
}

#[tokio::test]
async fn test_pending_publish_cancelled_by_disconnect() {
    let (manager, transport, _provider) = connected_manager().await;
    *transport.session().publish_delay.lock().await = Some(Duration::from_secs(30));

    let manager = Arc::new(manager);
    let publisher = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.publish("t", b"stuck", QoS::AtLeastOnce).await })
    };

    // Let the publish reach its suspension point, then disconnect.
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.disconnect().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), publisher)
        .await
        .expect("publish hung after disconnect")
        .unwrap();
    assert!(matches!(result, Err(ClientError::Disconnected)));
    assert!(transport.session().published().await.is_empty());
}

#[tokio::test]
async fn test_reconnect_after_clean_disconnect() {
    let (manager, transport, provider) = connected_manager().await;

    manager.disconnect().await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Disconnected);

    let transport2 = transport.clone();
    tokio::spawn(async move {
        loop {
            if transport2.opened_configs().await.len() >= 2 {
                transport2
                    .emit(SessionEvent::Connected {
                        session_present: false,
                    })
                    .await;
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    manager.connect(&provider).await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_while_active_is_rejected() {
    let (manager, _transport, provider) = connected_manager().await;

    let result = manager.connect(&provider).await;
    assert!(matches!(result, Err(ClientError::Connect { .. })));
    // The live connection is untouched.
    assert_eq!(manager.state(), ConnectionState::Connected);
}
