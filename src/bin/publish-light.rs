//! Light state publishing utility
//!
//! Publishes one light state straight to the MQTT broker, bypassing the
//! bridge, so browser clients subscribed through the bridge can be checked
//! end to end.
//!
//! ## Usage
//!
//! ```bash
//! # Turn a room's light on
//! publish-light --room room_1_left --on
//!
//! # Turn it off on a remote broker
//! publish-light --room room_1_left --off --broker-host broker.local --broker-port 1883
//! ```

use std::process;

use clap::Parser;
use mqtt_ws_bridge::config::MqttSection;
use mqtt_ws_bridge::observability::init_default_logging;
use mqtt_ws_bridge::protocol::{LightState, TopicBuilder};
use mqtt_ws_bridge::transport::mqtt::MqttClient;
use tokio::time::{sleep, Duration};

#[derive(Parser)]
#[command(
    name = "publish-light",
    about = "Publish a light state for one room directly to the MQTT broker"
)]
struct Args {
    /// Room identifier, e.g. room_1_left
    #[arg(long, default_value = "room_1_left")]
    room: String,

    /// Switch the light on
    #[arg(long, conflicts_with = "off")]
    on: bool,

    /// Switch the light off
    #[arg(long)]
    off: bool,

    /// MQTT broker host
    #[arg(long, default_value = "localhost", env = "MQTT_BROKER_HOST")]
    broker_host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883, env = "MQTT_BROKER_PORT")]
    broker_port: u16,

    /// Seconds to wait for the broker connection
    #[arg(long, default_value_t = 5)]
    connect_timeout: u64,
}

impl Args {
    fn is_on(&self) -> bool {
        // Without either flag the light is switched on
        self.on || !self.off
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_default_logging();

    if let Err(e) = publish(&args).await {
        eprintln!("✗ Failed to publish light state: {e}");
        process::exit(1);
    }
}

async fn publish(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let section = MqttSection {
        broker_url: format!("mqtt://{}:{}", args.broker_host, args.broker_port),
        client_id_prefix: "publish-light".to_string(),
        ..MqttSection::default()
    };

    let client = MqttClient::new(section)?;
    client.start()?;

    println!(
        "Connecting to MQTT broker {}:{}...",
        args.broker_host, args.broker_port
    );
    if !client
        .wait_until_ready(Duration::from_secs(args.connect_timeout))
        .await
    {
        client.disconnect().await?;
        return Err("broker did not accept the connection in time".into());
    }

    let topic = TopicBuilder::build_light_topic(&args.room);
    let state = LightState::new(args.room.clone(), args.is_on())
        .with_client_id(client.client_id().to_string());
    let payload = serde_json::to_string(&state)?;

    println!("📤 Publishing to {topic}");
    println!("   Payload: {payload}");
    client.publish(&topic, payload.into_bytes()).await?;

    // Let the event loop flush the publish before disconnecting
    sleep(Duration::from_millis(500)).await;
    client.disconnect().await?;

    println!("✓ Light state published");
    Ok(())
}
