use config::{Config, ConfigError, Environment, File};
use domain::{DeviceConfig, SchedulingConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Root of every published topic and of the write topic
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

fn default_topic_prefix() -> String {
    "gateway".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueueConfig {
    /// Backlog size above which the connector queue logs warnings (0 = never)
    #[serde(default = "default_soft_capacity")]
    pub soft_capacity: usize,
}

fn default_soft_capacity() -> usize {
    10_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            soft_capacity: default_soft_capacity(),
        }
    }
}

/// A device plus the driver that talks to it.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceEntry {
    #[serde(flatten)]
    pub device: DeviceConfig,
    pub driver: String,
    #[serde(default)]
    pub driver_config: serde_json::Value,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GatewayConfig {
    pub agent_id: String,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl GatewayConfig {
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .set_default("agent_id", "gateway-01")?
            // Required, so the gateway never starts without devices by accident
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(true))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Environment variables (e.g. GATEWAY__MQTT__HOST=10.0.0.1)
            .add_source(Environment::with_prefix("GATEWAY").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), domain::DomainError> {
        for entry in &self.devices {
            entry.device.validate()?;
        }
        Ok(())
    }
}
