//! Crate-level error taxonomy
//!
//! Module-local errors ([`CredentialsError`], [`ConfigError`],
//! [`TransportError`]) aggregate here into the one type callers match on.
//! Post-connect connection failures are intentionally absent: they are
//! reported through the notice channel and the `Failed` connection state,
//! never thrown into unrelated call paths.

use crate::config::ConfigError;
use crate::connection::ConnectionState;
use crate::credentials::CredentialsError;
use crate::transport::TransportError;
use thiserror::Error;

/// Error type for all public client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("credential provisioning failed")]
    Credentials(#[from] CredentialsError),

    #[error("configuration error")]
    Config(#[from] ConfigError),

    /// The initial connection attempt failed. Retrying is the caller's
    /// decision; the client does not retry a first connect on its own.
    #[error("connection attempt failed: {reason}")]
    Connect { reason: String },

    /// Operation attempted in a state that cannot serve it. Returned
    /// immediately; the caller may retry once the state allows.
    #[error("not connected (state: {state:?})")]
    NotConnected { state: ConnectionState },

    /// Operation cancelled because `disconnect()` was called while it was
    /// pending.
    #[error("operation cancelled by disconnect")]
    Disconnected,

    #[error("transport error")]
    Transport(#[from] TransportError),
}

/// Result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Strip credential-bearing fragments out of a message before it reaches
/// logs or notices. Transport errors can embed the signed websocket URL,
/// which carries the signature and session token in its query string.
pub fn redact_secrets(message: &str) -> String {
    let mut sanitized = message.to_string();

    sanitized = regex::Regex::new(r"(?i)(X-Amz-Signature|X-Amz-Security-Token|X-Amz-Credential)=[^&\s]+")
        .unwrap()
        .replace_all(&sanitized, "${1}=***")
        .to_string();

    sanitized = regex::Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+")
        .unwrap()
        .replace_all(&sanitized, "${1}=***")
        .to_string();

    // Bound what one error can drag into a log line.
    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let max_content_len = 500 - truncate_suffix.len();
        sanitized = format!("{}{}", &sanitized[..max_content_len], truncate_suffix);
    }

    sanitized
}
