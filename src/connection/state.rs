//! Pure connection state transitions
//!
//! One tagged state, one transition function. Every lifecycle event for a
//! connection flows through [`apply_event`] exactly once, in transport order,
//! so there is a single place to read the whole state machine.

use crate::transport::SessionEvent;
use tracing::{error, info, warn};

/// Connection lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt made yet.
    Idle,
    /// First connect in flight.
    Connecting,
    /// Session established; publish/subscribe are valid.
    Connected,
    /// Connection lost; the transport is reconnecting.
    Interrupted,
    /// Cleanly shut down at the caller's request. Terminal.
    Disconnected,
    /// Unrecoverable failure. Terminal until an explicit reconnect.
    Failed(String),
}

/// Next state for a lifecycle event.
///
/// `disconnect_requested` disambiguates the one genuinely ambiguous event: a
/// disconnect we asked for is terminal, an unsolicited one is an interruption
/// awaiting reconnection.
pub fn apply_event(
    current: &ConnectionState,
    event: &SessionEvent,
    disconnect_requested: bool,
) -> ConnectionState {
    match event {
        SessionEvent::Connected { .. } | SessionEvent::Resumed { .. } => ConnectionState::Connected,
        SessionEvent::Interrupted { .. } => ConnectionState::Interrupted,
        SessionEvent::Disconnected => {
            if disconnect_requested {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Interrupted
            }
        }
        SessionEvent::Errored { reason } => ConnectionState::Failed(reason.clone()),
        SessionEvent::Message { .. } => current.clone(),
    }
}

pub fn can_publish(state: &ConnectionState) -> bool {
    matches!(state, ConnectionState::Connected)
}

pub fn can_subscribe(state: &ConnectionState) -> bool {
    matches!(state, ConnectionState::Connected)
}

pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
    if from == to {
        return;
    }
    match (from, to) {
        (ConnectionState::Connecting, ConnectionState::Connected) => {
            info!("connection established");
        }
        (ConnectionState::Connected, ConnectionState::Interrupted) => {
            warn!("connection interrupted");
        }
        (ConnectionState::Interrupted, ConnectionState::Connected) => {
            info!("connection resumed");
        }
        (_, ConnectionState::Failed(reason)) => {
            error!("connection failed: {reason}");
        }
        (from, to) => {
            info!("connection state: {from:?} -> {to:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_event_transitions_to_connected() {
        let next = apply_event(
            &ConnectionState::Connecting,
            &SessionEvent::Connected {
                session_present: true,
            },
            false,
        );
        assert_eq!(next, ConnectionState::Connected);
    }

    #[test]
    fn test_interrupted_event() {
        let next = apply_event(
            &ConnectionState::Connected,
            &SessionEvent::Interrupted {
                reason: "socket closed".to_string(),
            },
            false,
        );
        assert_eq!(next, ConnectionState::Interrupted);
    }

    #[test]
    fn test_resumed_event_returns_to_connected() {
        let next = apply_event(
            &ConnectionState::Interrupted,
            &SessionEvent::Resumed {
                return_code: 0,
                session_present: false,
            },
            false,
        );
        assert_eq!(next, ConnectionState::Connected);
    }

    #[test]
    fn test_requested_disconnect_is_terminal() {
        let next = apply_event(&ConnectionState::Connected, &SessionEvent::Disconnected, true);
        assert_eq!(next, ConnectionState::Disconnected);
    }

    #[test]
    fn test_unsolicited_disconnect_is_an_interruption() {
        let next = apply_event(
            &ConnectionState::Connected,
            &SessionEvent::Disconnected,
            false,
        );
        assert_eq!(next, ConnectionState::Interrupted);
    }

    #[test]
    fn test_errored_event_is_failure() {
        let next = apply_event(
            &ConnectionState::Connected,
            &SessionEvent::Errored {
                reason: "broker gone".to_string(),
            },
            false,
        );
        assert_eq!(next, ConnectionState::Failed("broker gone".to_string()));
    }

    #[test]
    fn test_message_event_leaves_state_unchanged() {
        let next = apply_event(
            &ConnectionState::Connected,
            &SessionEvent::Message {
                topic: "t".to_string(),
                payload: vec![1],
                retain: false,
            },
            false,
        );
        assert_eq!(next, ConnectionState::Connected);
    }

    #[test]
    fn test_can_publish_only_when_connected() {
        assert!(can_publish(&ConnectionState::Connected));
        assert!(!can_publish(&ConnectionState::Idle));
        assert!(!can_publish(&ConnectionState::Connecting));
        assert!(!can_publish(&ConnectionState::Interrupted));
        assert!(!can_publish(&ConnectionState::Disconnected));
        assert!(!can_publish(&ConnectionState::Failed("x".to_string())));
    }

    #[test]
    fn test_can_subscribe_only_when_connected() {
        assert!(can_subscribe(&ConnectionState::Connected));
        assert!(!can_subscribe(&ConnectionState::Connecting));
        assert!(!can_subscribe(&ConnectionState::Interrupted));
    }
}
