//! Infrastructure layer - External integrations

pub mod config;
pub mod drivers;
pub mod messaging;

pub use config::{DeviceEntry, GatewayConfig, MqttConfig, QueueConfig};
pub use drivers::{DriverFactory, SimulatedPlc, SimulatorConfig};
pub use messaging::mqtt_client::{MqttClient, MqttMessage};
pub use messaging::mqtt_connector::{MqttConnector, MqttEventSink, WriteRequest};
pub use messaging::{AggregatingQueue, QueuedPublisher};
