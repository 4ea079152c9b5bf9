//! MQTT WebSocket bridge - Main Entry Point
//!
//! Wires the upstream MQTT connection, the message router and the HTTP
//! server together, then waits for a shutdown signal.

use clap::{Parser, Subcommand};
use mqtt_ws_bridge::bridge::{ClientRegistry, MessageRouter};
use mqtt_ws_bridge::config::BridgeConfig;
use mqtt_ws_bridge::error::{BridgeError, BridgeResult};
use mqtt_ws_bridge::observability::LogSettings;
use mqtt_ws_bridge::server::{self, AppState};
use mqtt_ws_bridge::transport::mqtt::MqttClient;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;
use tracing::{error, info, warn, Level};

/// Capacity of the broker-to-router channel
const ROUTER_CHANNEL_CAPACITY: usize = 1024;

/// WebSocket to MQTT bridge
#[derive(Parser)]
#[command(name = "mqtt-ws-bridge")]
#[command(about = "Multiplexes browser WebSocket clients onto one MQTT broker connection")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge (default)
    Run,
    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut log_settings = LogSettings::from_env();
    match cli.verbose {
        0 => {}
        1 => log_settings.level = Level::DEBUG,
        _ => log_settings.level = Level::TRACE,
    }
    log_settings.init();

    info!("Starting MQTT WebSocket bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_bridge(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&PathBuf>) -> BridgeResult<BridgeConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(BridgeConfig::load_from_file(path)?);
    }

    for path_str in ["bridge.toml", "config/bridge.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(BridgeConfig::load_from_file(&path)?);
        }
    }

    info!("No configuration file found, using defaults and environment");
    Ok(BridgeConfig::from_env()?)
}

async fn run_bridge(config: BridgeConfig) -> BridgeResult<()> {
    let registry = ClientRegistry::new();
    let (message_tx, message_rx) = mpsc::channel(ROUTER_CHANNEL_CAPACITY);

    let broker = MqttClient::new(config.mqtt.clone())?;
    broker.set_message_sender(message_tx).await;
    info!(
        client_id = %broker.client_id(),
        broker_url = %config.mqtt.broker_url,
        "Connecting to MQTT broker"
    );
    broker.start()?;
    let broker = Arc::new(broker);

    let router_task = tokio::spawn(MessageRouter::new(registry.clone()).run(message_rx));

    let readiness_broker = broker.clone();
    tokio::spawn(async move {
        if !readiness_broker
            .wait_until_ready(Duration::from_secs(5))
            .await
        {
            warn!("MQTT broker not reachable yet, requests fail until it connects");
        }
    });

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let state = AppState::new(registry, broker.clone());
    let server_config = config.server.clone();
    let mut server_task = tokio::spawn(async move {
        server::serve(state, &server_config, async {
            let _ = shutdown_rx.await;
        })
        .await
    });

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    let server_result = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            None
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            None
        }
        result = &mut server_task => Some(result),
    };

    info!("Application shutdown initiated");
    let server_result = match server_result {
        Some(result) => result,
        None => {
            let _ = shutdown_tx.send(());
            server_task.await
        }
    };

    broker.disconnect().await?;
    router_task.abort();

    match server_result {
        Ok(result) => result,
        Err(e) => Err(BridgeError::server(format!("HTTP server task failed: {e}"))),
    }
}

fn handle_config_command(config: &BridgeConfig, show: bool) -> BridgeResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)?;
        println!("Resolved configuration:");
        println!("{rendered}");
    }

    info!("Configuration validation complete");
    Ok(())
}
