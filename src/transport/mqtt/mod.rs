//! MQTT-over-websocket transport implementation
//!
//! Split the same way as the rest of the crate: pure pieces
//! ([`options`] for configuration and reconnect policy, [`signing`] for the
//! presigned websocket URL) separate from the impure event-loop driver in
//! [`client`].

pub mod client;
pub mod options;
pub mod signing;

pub use client::WebSocketMqtt;
pub use options::{ReconnectConfig, ReconnectDecision};
pub use signing::presign_websocket_url;
