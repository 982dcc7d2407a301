use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::event::EventPublisher;

/// Entry points a connector uses to act on the gateway.
#[async_trait]
pub trait GatewayControl: Send + Sync {
    /// Merges `bytes` at device-absolute `offset` into a write tag's pending
    /// buffer. Returns whether the tag became dirty.
    fn request_tag_write(&self, device_id: &str, tag_id: &str, offset: usize, bytes: &[u8]) -> Result<bool>;

    /// Feeds the last known device status and a full snapshot of every tag
    /// into `sink`, without touching the devices.
    async fn initialize(&self, sink: &dyn EventPublisher);
}

/// Downstream system attached to the gateway (MQTT, TCP, ...).
/// Receives every event and may push write requests back.
#[async_trait]
pub trait Connector: EventPublisher {
    fn name(&self) -> &str;

    async fn start(&self, control: Arc<dyn GatewayControl>) -> anyhow::Result<()>;

    async fn stop(&self);
}
