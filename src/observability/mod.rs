//! Observability for the client
//!
//! Structured logging setup. Connection-level observability (state watch,
//! notice channel) lives on the connection manager itself.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
