//! Configuration loading tests

use skylink::{ClientConfig, ConfigError};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_complete_config() {
    let file = write_config(
        r#"
        [broker]
        endpoint = "example.iot.us-east-1.amazonaws.com"
        client_id = "bench-client"
        keep_alive_secs = 45

        [identity]
        identity_pool_id = "us-east-1:0f1c23"
        region = "us-east-1"
        refresh_interval_secs = 1800
        "#,
    );

    let config = ClientConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.broker.endpoint, "example.iot.us-east-1.amazonaws.com");
    assert_eq!(config.broker.client_id, "bench-client");
    assert_eq!(config.broker.keep_alive_secs, 45);
    assert_eq!(config.identity.refresh_interval_secs, 1800);
}

#[test]
fn test_load_applies_defaults() {
    let file = write_config(
        r#"
        [broker]
        endpoint = "example.iot.us-east-1.amazonaws.com"

        [identity]
        identity_pool_id = "us-east-1:0f1c23"
        region = "us-east-1"
        "#,
    );

    let config = ClientConfig::load_from_file(file.path()).unwrap();
    assert!(config.broker.clean_session);
    assert_eq!(config.broker.keep_alive_secs, 30);
    assert_eq!(config.broker.connect_timeout_secs, 60);
    assert!(config.broker.client_id.starts_with("skylink-"));
}

#[test]
fn test_load_rejects_missing_section() {
    let file = write_config(
        r#"
        [broker]
        endpoint = "example.iot.us-east-1.amazonaws.com"
        "#,
    );

    assert!(matches!(
        ClientConfig::load_from_file(file.path()),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_load_rejects_empty_endpoint() {
    let file = write_config(
        r#"
        [broker]
        endpoint = ""

        [identity]
        identity_pool_id = "us-east-1:0f1c23"
        region = "us-east-1"
        "#,
    );

    assert!(matches!(
        ClientConfig::load_from_file(file.path()),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
fn test_load_rejects_missing_file() {
    assert!(matches!(
        ClientConfig::load_from_file("/nonexistent/skylink.toml"),
        Err(ConfigError::Read { .. })
    ));
}
