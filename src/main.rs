//! Skylink command-line client
//!
//! Thin driver around [`PubSubClient`]: connect, subscribe to one topic
//! filter, publish stdin lines to it, disconnect on ctrl-c.

use clap::{Parser, Subcommand};
use skylink::observability::init_default_logging;
use skylink::{ClientConfig, ConnectionNotice, PubSubClient, QoS};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "skylink")]
#[command(about = "Credential-rotating MQTT-over-websocket pub/sub client")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run a pub/sub session
    Run {
        /// Topic filter to subscribe to, and topic to publish stdin lines on
        #[arg(short, long, default_value = "exporting")]
        topic: String,
    },
    /// Validate configuration
    Config {
        /// Show the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_default_logging();

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { topic } => run_session(config, topic).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("command failed: {e}");
        process::exit(1);
    }
}

fn load_configuration(path: &Option<PathBuf>) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("loading configuration from {}", path.display());
            Ok(ClientConfig::load_from_file(path)?)
        }
        None => {
            let default_path = PathBuf::from("skylink.toml");
            if default_path.exists() {
                info!("loading configuration from skylink.toml");
                return Ok(ClientConfig::load_from_file(&default_path)?);
            }
            info!("no config file found, reading SKYLINK_* environment");
            Ok(ClientConfig::from_env()?)
        }
    }
}

async fn run_session(
    config: ClientConfig,
    topic: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = PubSubClient::new(&config)?;

    // Surface interruptions and failures as log lines while the session runs.
    let mut notices = client.notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            match notice {
                ConnectionNotice::Interrupted { reason } => {
                    warn!("connection interrupted: {reason}");
                }
                ConnectionNotice::Resumed { session_present } => {
                    info!("connection resumed (session_present={session_present})");
                }
                ConnectionNotice::Failed { reason } => error!("connection failed: {reason}"),
                ConnectionNotice::Disconnected => info!("connection closed"),
            }
        }
    });

    client.connect().await?;

    client
        .subscribe(
            &topic,
            QoS::AtLeastOnce,
            Arc::new(|topic, payload| {
                println!("[{topic}] {}", String::from_utf8_lossy(payload));
            }),
        )
        .await?;
    info!(topic, "subscribed; stdin lines are published, ctrl-c exits");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            line = lines.next_line() => {
                match line? {
                    Some(line) if !line.is_empty() => {
                        if let Err(e) = client.publish(&topic, line.as_bytes(), QoS::AtLeastOnce).await {
                            warn!("publish failed: {e}");
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}

fn handle_config_command(
    config: ClientConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    println!("configuration is valid");
    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
