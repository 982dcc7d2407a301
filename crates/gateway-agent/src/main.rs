use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use application::Gateway;
use infrastructure::{DriverFactory, GatewayConfig, MqttClient, MqttConfig, MqttConnector};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config directory
    #[arg(long, default_value = "config")]
    config_dir: String,

    /// Override Agent ID
    #[arg(long)]
    agent_id: Option<String>,

    /// Override MQTT Host
    #[arg(long)]
    mqtt_host: Option<String>,

    /// Override MQTT Port
    #[arg(long)]
    mqtt_port: Option<u16>,
}

fn apply_overrides(config: &mut GatewayConfig, args: Args) {
    if let Some(id) = args.agent_id {
        config.agent_id = id;
    }
    if args.mqtt_host.is_some() || args.mqtt_port.is_some() {
        let mqtt = config.mqtt.get_or_insert_with(|| MqttConfig {
            host: "localhost".to_string(),
            port: 1883,
            topic_prefix: "gateway".to_string(),
        });
        if let Some(host) = args.mqtt_host {
            mqtt.host = host;
        }
        if let Some(port) = args.mqtt_port {
            mqtt.port = port;
        }
    }
}

async fn run() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,gateway_agent=debug,application=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(pid = std::process::id(), "Tag gateway starting");

    let args = Args::parse();

    // Run from the workspace root or next to the binary
    let dev_base = "crates/gateway-agent";
    let config_dir = if std::path::Path::new(dev_base).exists() && args.config_dir == "config" {
        format!("{}/config", dev_base)
    } else {
        args.config_dir.clone()
    };

    info!(config_dir = %config_dir, "Loading configuration");
    let mut config = GatewayConfig::load(&config_dir)
        .with_context(|| format!("Failed to load configuration from {}", config_dir))?;
    apply_overrides(&mut config, args);
    config.validate()?;

    let agent_id = config.agent_id.clone();
    info!(agent_id = %agent_id, devices = config.devices.len(), "Configuration loaded");

    let gateway = Arc::new(Gateway::new(config.scheduling.clone()));

    for entry in &config.devices {
        let driver = match DriverFactory::create_driver(&entry.driver, entry.driver_config.clone()) {
            Ok(driver) => driver,
            Err(e) => {
                error!(device_id = %entry.device.id, error = %e, "Failed to create driver, skipping device");
                continue;
            }
        };
        if let Err(e) = gateway.add_device(entry.device.clone(), driver).await {
            error!(device_id = %entry.device.id, error = %e, "Failed to register device");
        }
    }

    let mut mqtt_status = None;
    if let Some(mqtt) = &config.mqtt {
        info!(host = %mqtt.host, port = mqtt.port, "Connecting to MQTT Broker...");

        let status_topic = format!("{}/agents/{}", mqtt.topic_prefix, agent_id);
        let last_will = rumqttc::LastWill::new(
            &status_topic,
            serde_json::json!({ "status": "OFFLINE" }).to_string(),
            rumqttc::QoS::AtLeastOnce,
            true,
        );
        let client = MqttClient::new(
            &mqtt.host,
            mqtt.port,
            &format!("gateway-{}", agent_id),
            Some(last_will),
        )
        .await?;

        gateway.add_connector(Arc::new(MqttConnector::new(
            client.clone(),
            mqtt.topic_prefix.clone(),
            config.queue.soft_capacity,
        )))
        .await;
        mqtt_status = Some((client, status_topic));
    } else {
        warn!("No MQTT broker configured, events stay local");
    }

    gateway.start().await;

    if let Some((client, topic)) = &mqtt_status {
        let online = serde_json::json!({ "status": "ONLINE" }).to_string();
        if let Err(e) = client.publish(topic, &online, true).await {
            warn!(error = %e, "Failed to publish ONLINE status");
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down..."),
        Err(err) => warn!(error = %err, "Unable to listen for shutdown signal"),
    }

    // Publish OFFLINE first; stopping the connector disconnects the client
    if let Some((client, topic)) = &mqtt_status {
        let offline = serde_json::json!({ "status": "OFFLINE" }).to_string();
        let _ = client.publish(topic, &offline, true).await;
    }
    gateway.stop().await;

    info!("Good bye!");
    Ok(())
}

fn main() {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {:?}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(run()) {
        eprintln!("\nCRITICAL ERROR: {:?}", e);
        std::process::exit(1);
    }
}
