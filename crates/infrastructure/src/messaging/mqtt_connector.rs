use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rumqttc::QoS;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use domain::event::{EventPublisher, GatewayEvent, PublishError, TagEvent};
use domain::{Connector, GatewayControl};

use super::mqtt_client::{MqttClient, MqttMessage, MqttPublisherClient};
use super::queued_publisher::QueuedPublisher;

/// Write request accepted on `{prefix}/write`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WriteRequest {
    pub device_id: String,
    pub tag_id: String,
    /// Device-absolute offset of `data[0]`
    pub offset: usize,
    pub data: Vec<u8>,
}

/// Serializes gateway events as JSON under `{prefix}/{device_id}/...`.
pub struct MqttEventSink {
    client: Arc<dyn MqttPublisherClient>,
    prefix: String,
}

impl MqttEventSink {
    pub fn new(client: Arc<dyn MqttPublisherClient>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    /// Topic, payload and retain flag for an event.
    pub fn encode(&self, event: &GatewayEvent) -> (String, Value, bool) {
        let device = event.device_id();
        match event {
            GatewayEvent::TagRead(e) => (
                format!("{}/{}/read/{}", self.prefix, device, e.tag_id),
                tag_payload(e),
                false,
            ),
            GatewayEvent::TagWrite(e) => (
                format!("{}/{}/write/{}", self.prefix, device, e.tag_id),
                tag_payload(e),
                false,
            ),
            GatewayEvent::DeviceStatus(e) => (
                format!("{}/{}/status", self.prefix, device),
                json!({
                    "status": e.status.as_str(),
                    "code": e.error.code,
                    "message": e.error.message,
                    "error_count": e.error_count,
                    "ts": e.timestamp.timestamp_millis()
                }),
                true,
            ),
            GatewayEvent::Exception(e) => (
                format!("{}/{}/exception", self.prefix, device),
                json!({
                    "message": e.message,
                    "ts": e.timestamp.timestamp_millis()
                }),
                false,
            ),
        }
    }
}

/// Only the changed bytes travel; `offset` is device-absolute.
fn tag_payload(event: &TagEvent) -> Value {
    let (offset, data, full) = match &event.data {
        Some(data) => (
            event.byte_offset + data.range.start,
            Some(data.changed_bytes().to_vec()),
            data.full,
        ),
        None => (event.byte_offset, None, false),
    };

    json!({
        "tag_id": event.tag_id,
        "offset": offset,
        "data": data,
        "full": full,
        "code": event.status.code,
        "message": event.status.message,
        "status_changed": event.status_changed,
        "ts": event.timestamp.timestamp_millis()
    })
}

#[async_trait]
impl EventPublisher for MqttEventSink {
    async fn publish(&self, event: GatewayEvent) -> Result<(), PublishError> {
        let (topic, payload, retain) = self.encode(&event);
        self.client
            .publish_bytes(&topic, payload.to_string().as_bytes(), QoS::AtLeastOnce, retain)
            .await?;
        Ok(())
    }
}

/// Parses a write request and routes it to the gateway.
/// Returns whether the target tag became dirty.
pub fn apply_write_request(control: &dyn GatewayControl, payload: &[u8]) -> Result<bool> {
    let request: WriteRequest =
        serde_json::from_slice(payload).context("Invalid write request payload")?;
    let dirty = control.request_tag_write(
        &request.device_id,
        &request.tag_id,
        request.offset,
        &request.data,
    )?;
    Ok(dirty)
}

/// Connector publishing events over MQTT and accepting write requests.
///
/// Events pass through a coalescing queue before reaching the broker.
/// Every (re)connect replays the current gateway state.
pub struct MqttConnector {
    client: MqttClient,
    prefix: String,
    queue: Arc<QueuedPublisher>,
    cancel_token: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl MqttConnector {
    pub fn new(client: MqttClient, prefix: impl Into<String>, queue_capacity: usize) -> Self {
        let prefix = prefix.into();
        let sink = Arc::new(MqttEventSink::new(Arc::new(client.clone()), prefix.clone()));
        Self {
            client,
            prefix,
            queue: Arc::new(QueuedPublisher::new(sink, queue_capacity)),
            cancel_token: CancellationToken::new(),
            listener: Mutex::new(None),
        }
    }

    pub fn write_topic(&self) -> String {
        format!("{}/write", self.prefix)
    }
}

#[async_trait]
impl EventPublisher for MqttConnector {
    async fn publish(&self, event: GatewayEvent) -> Result<(), PublishError> {
        self.queue.publish(event).await
    }
}

#[async_trait]
impl Connector for MqttConnector {
    fn name(&self) -> &str {
        "mqtt"
    }

    async fn start(&self, control: Arc<dyn GatewayControl>) -> Result<()> {
        let topic = self.write_topic();
        self.client.subscribe(&topic).await?;
        info!(topic = %topic, "Listening for write requests");

        let messages = self.client.subscribe_messages();
        let connections = self.client.subscribe_connections();
        if self.client.is_connected() {
            control.initialize(self.queue.as_ref()).await;
        }

        let handle = tokio::spawn(run_listener(
            self.client.clone(),
            topic,
            control,
            self.queue.clone(),
            messages,
            connections,
            self.cancel_token.clone(),
        ));
        *self.listener.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        self.cancel_token.cancel();
        if let Some(listener) = self.listener.lock().await.take() {
            if let Err(e) = listener.await {
                warn!(error = %e, "MQTT listener ended abnormally");
            }
        }
        self.queue.stop().await;
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect failed");
        }
        info!("MQTT connector stopped");
    }
}

async fn run_listener(
    client: MqttClient,
    topic: String,
    control: Arc<dyn GatewayControl>,
    queue: Arc<QueuedPublisher>,
    mut messages: broadcast::Receiver<MqttMessage>,
    mut connections: broadcast::Receiver<()>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            connected = connections.recv() => match connected {
                Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    info!("MQTT (re)connected, replaying gateway state");
                    control.initialize(queue.as_ref()).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = messages.recv() => match message {
                Ok(msg) => {
                    if msg.topic != topic {
                        continue;
                    }
                    match apply_write_request(control.as_ref(), &msg.payload) {
                        Ok(dirty) => debug!(dirty, "Write request applied"),
                        Err(e) => warn!(error = %e, "Rejected write request"),
                    }
                    if let Err(e) = client.ack(&msg.topic, msg.pkid).await {
                        warn!(error = %e, "Failed to ack write request");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Write listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    error!("MQTT message channel closed");
                    break;
                }
            },
        }
    }
}
