use anyhow::{Result, anyhow};
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use std::sync::{
    Arc, PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task;
use tracing::{debug, error, info};

#[derive(Clone, Debug)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub pkid: u16,
}

#[async_trait::async_trait]
pub trait MqttPublisherClient: Send + Sync {
    async fn publish_bytes(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<()>;
    fn is_connected(&self) -> bool;
}

/// Thin wrapper over the rumqttc event loop.
///
/// Incoming publishes are re-broadcast to `subscribe_messages` receivers;
/// every (re)connect is announced on `subscribe_connections` after the
/// stored subscriptions have been renewed.
#[derive(Clone)]
pub struct MqttClient {
    client: AsyncClient,
    tx: broadcast::Sender<MqttMessage>,
    connections: broadcast::Sender<()>,
    connected: Arc<AtomicBool>,
    subscriptions: Arc<RwLock<Vec<String>>>,
}

impl MqttClient {
    pub async fn new(
        host: &str,
        port: u16,
        client_id: &str,
        last_will: Option<LastWill>,
    ) -> Result<Self> {
        let mut mqttoptions = MqttOptions::new(client_id, host, port);
        mqttoptions.set_keep_alive(Duration::from_secs(20));
        mqttoptions.set_clean_session(false); // keep write requests queued while offline
        mqttoptions.set_manual_acks(true);

        if let Some(will) = last_will {
            mqttoptions.set_last_will(will);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
        let (tx, _) = broadcast::channel(250);
        let (connections, _) = broadcast::channel(8);
        let connected = Arc::new(AtomicBool::new(false));
        let subscriptions = Arc::new(RwLock::new(Vec::<String>::new()));

        let tx_clone = tx.clone();
        let connections_clone = connections.clone();
        let connected_clone = connected.clone();
        let subscriptions_clone = subscriptions.clone();
        let client_clone = client.clone();

        task::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = MqttMessage {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                            pkid: publish.pkid,
                        };
                        if tx_clone.send(msg).is_err() {
                            debug!("Dropped MQTT message, no listeners");
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT Connected");
                        connected_clone.store(true, Ordering::Relaxed);

                        let subs = subscriptions_clone
                            .read()
                            .unwrap_or_else(PoisonError::into_inner)
                            .clone();
                        for topic in subs {
                            if let Err(e) = client_clone.subscribe(&topic, QoS::AtLeastOnce).await {
                                error!(topic = %topic, error = %e, "Failed to re-subscribe");
                            }
                        }
                        let _ = connections_clone.send(());
                    }
                    Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => {
                        connected_clone.store(false, Ordering::Relaxed);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = ?e, "MQTT Connection error");
                        connected_clone.store(false, Ordering::Relaxed);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Self {
            client,
            tx,
            connections,
            connected,
            subscriptions,
        })
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<MqttMessage> {
        self.tx.subscribe()
    }

    pub fn subscribe_connections(&self) -> broadcast::Receiver<()> {
        self.connections.subscribe()
    }

    pub async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        self.publish_bytes(topic, payload.as_bytes(), QoS::AtLeastOnce, retain)
            .await
    }

    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        {
            let mut subs = self
                .subscriptions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if !subs.iter().any(|s| s == topic) {
                subs.push(topic.to_string());
            }
        }

        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| anyhow!("Failed to subscribe to topic {}: {}", topic, e))?;
        Ok(())
    }

    pub async fn ack(&self, topic: &str, pkid: u16) -> Result<()> {
        let publish = rumqttc::Publish {
            pkid,
            topic: topic.to_string(),
            qos: QoS::AtLeastOnce,
            payload: bytes::Bytes::new(),
            retain: false,
            dup: false,
        };

        self.client
            .ack(&publish)
            .await
            .map_err(|e| anyhow!("Failed to ack packet {}: {}", pkid, e))
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.client
            .disconnect()
            .await
            .map_err(|e| anyhow!("Failed to disconnect: {}", e))
    }
}

#[async_trait::async_trait]
impl MqttPublisherClient for MqttClient {
    async fn publish_bytes(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<()> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(|e| anyhow!("Failed to publish MQTT message: {}", e))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
