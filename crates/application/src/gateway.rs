use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use domain::error::{DomainError, Result};
use domain::event::{DeviceStatusEvent, EventPublisher, GatewayEvent, PublishError};
use domain::{
    Connector, Device, DeviceConfig, DeviceStatus, GatewayControl, SchedulingConfig, TagDriver,
};

use crate::events::StatusCache;
use crate::scheduler::DeviceScheduler;

/// Owns every device scheduler and connector of the process.
///
/// Events of all devices reach every connector; write requests coming back
/// from connectors are routed to the owning tag.
pub struct Gateway {
    settings: SchedulingConfig,
    schedulers: DashMap<String, Arc<DeviceScheduler>>,
    connectors: RwLock<Vec<Arc<dyn Connector>>>,
    status_cache: Arc<StatusCache>,
    running: AtomicBool,
}

/// Lets a connector subscribe to a scheduler's fan-out.
struct ConnectorSink(Arc<dyn Connector>);

#[async_trait]
impl EventPublisher for ConnectorSink {
    async fn publish(&self, event: GatewayEvent) -> std::result::Result<(), PublishError> {
        self.0.publish(event).await
    }
}

impl Gateway {
    pub fn new(settings: SchedulingConfig) -> Self {
        Self {
            settings,
            schedulers: DashMap::new(),
            connectors: RwLock::new(Vec::new()),
            status_cache: Arc::new(StatusCache::new()),
            running: AtomicBool::new(false),
        }
    }

    fn connector_list(&self) -> Vec<Arc<dyn Connector>> {
        self.connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Registers a device. When the gateway is already running the device
    /// scheduler starts right away.
    pub async fn add_device(
        &self,
        config: DeviceConfig,
        driver: Arc<dyn TagDriver>,
    ) -> Result<Arc<DeviceScheduler>> {
        let scheduler = match self.schedulers.entry(config.id.clone()) {
            Entry::Occupied(_) => {
                return Err(DomainError::InvalidConfiguration(format!(
                    "Duplicate device {}",
                    config.id
                )));
            }
            Entry::Vacant(slot) => {
                let device = Arc::new(Device::new(config)?);
                let scheduler = Arc::new(DeviceScheduler::new(
                    device.clone(),
                    driver,
                    self.settings.clone(),
                ));

                scheduler.subscribe(self.status_cache.clone());
                for connector in self.connector_list() {
                    scheduler.subscribe(Arc::new(ConnectorSink(connector)));
                }

                info!(
                    device_id = %device.id(),
                    tags = device.tags().len(),
                    "Device registered"
                );
                slot.insert(scheduler.clone());
                scheduler
            }
        };

        if self.running.load(Ordering::SeqCst) {
            scheduler.start().await;
        }
        Ok(scheduler)
    }

    /// Stops and forgets a device. Pending writes are drained first.
    pub async fn remove_device(&self, device_id: &str) -> Result<()> {
        let (_, scheduler) = self
            .schedulers
            .remove(device_id)
            .ok_or_else(|| DomainError::DeviceNotFound(device_id.to_string()))?;

        scheduler.stop().await;
        self.status_cache.remove(device_id);
        info!(device_id = %device_id, "Device removed");
        Ok(())
    }

    /// Attaches a connector. It receives the events of every device,
    /// including devices added later, and is started right away when the
    /// gateway is already running.
    pub async fn add_connector(self: &Arc<Self>, connector: Arc<dyn Connector>) {
        info!(connector = connector.name(), "Connector registered");
        for entry in self.schedulers.iter() {
            entry
                .value()
                .subscribe(Arc::new(ConnectorSink(connector.clone())));
        }

        let start_now = {
            let mut connectors = self.connectors.write().unwrap_or_else(PoisonError::into_inner);
            connectors.push(connector.clone());
            self.running.load(Ordering::SeqCst)
        };
        if start_now {
            let control: Arc<dyn GatewayControl> = self.clone();
            if let Err(e) = connector.start(control).await {
                error!(connector = connector.name(), error = %e, "Failed to start connector");
            }
        }
    }

    pub async fn start(self: &Arc<Self>) {
        // Flipped under the connector lock so a concurrent add_connector
        // starts its connector exactly once.
        let connectors = {
            let connectors = self.connectors.write().unwrap_or_else(PoisonError::into_inner);
            if self.running.swap(true, Ordering::SeqCst) {
                warn!("Gateway already running");
                return;
            }
            connectors.clone()
        };

        let control: Arc<dyn GatewayControl> = self.clone();
        for connector in connectors {
            if let Err(e) = connector.start(control.clone()).await {
                error!(connector = connector.name(), error = %e, "Failed to start connector");
            }
        }

        for scheduler in self.scheduler_list() {
            scheduler.start().await;
        }
        info!(devices = self.schedulers.len(), "Gateway started");
    }

    /// Stops every scheduler in parallel, then the connectors so the last
    /// events still reach them.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Gateway not running");
            return;
        }

        let schedulers = self.scheduler_list();
        join_all(schedulers.iter().map(|s| s.stop())).await;

        for connector in self.connector_list() {
            connector.stop().await;
        }
        info!("Gateway stopped");
    }

    pub fn pause_device(&self, device_id: &str) -> Result<()> {
        self.scheduler(device_id)?.pause();
        Ok(())
    }

    pub fn resume_device(&self, device_id: &str) -> Result<()> {
        self.scheduler(device_id)?.resume();
        Ok(())
    }

    pub fn scheduler(&self, device_id: &str) -> Result<Arc<DeviceScheduler>> {
        self.schedulers
            .get(device_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DomainError::DeviceNotFound(device_id.to_string()))
    }

    pub fn device(&self, device_id: &str) -> Result<Arc<Device>> {
        Ok(self.scheduler(device_id)?.device().clone())
    }

    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.schedulers.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn last_status(&self, device_id: &str) -> Option<DeviceStatusEvent> {
        self.status_cache.get(device_id)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn scheduler_list(&self) -> Vec<Arc<DeviceScheduler>> {
        self.schedulers.iter().map(|e| e.value().clone()).collect()
    }
}

#[async_trait]
impl GatewayControl for Gateway {
    fn request_tag_write(
        &self,
        device_id: &str,
        tag_id: &str,
        offset: usize,
        bytes: &[u8],
    ) -> Result<bool> {
        let device = self.device(device_id)?;
        if device.status() == DeviceStatus::Disabled {
            return Err(DomainError::DeviceDisabled(device_id.to_string()));
        }

        let tag = device
            .find_tag(tag_id)
            .ok_or_else(|| DomainError::TagNotFound {
                device_id: device_id.to_string(),
                tag_id: tag_id.to_string(),
            })?;
        if !tag.config().is_write() {
            return Err(DomainError::NotWritable(tag_id.to_string()));
        }

        let dirty = tag.merge_write(offset, bytes, Instant::now());
        debug!(
            device_id = %device_id,
            tag_id = %tag_id,
            offset,
            len = bytes.len(),
            dirty,
            "Write requested"
        );
        Ok(dirty)
    }

    async fn initialize(&self, sink: &dyn EventPublisher) {
        let devices: Vec<Arc<Device>> = self
            .scheduler_list()
            .iter()
            .map(|s| s.device().clone())
            .collect();

        for device in devices {
            let status = self
                .status_cache
                .get(device.id())
                .unwrap_or_else(|| device.status_event());
            let mut events = vec![GatewayEvent::DeviceStatus(status)];
            events.extend(
                device
                    .tags()
                    .iter()
                    .map(|tag| GatewayEvent::TagRead(tag.snapshot_event(device.id()))),
            );

            if let Err(e) = sink.publish_batch(events).await {
                warn!(device_id = %device.id(), error = %e, "Initialization publish failed");
            }
        }
    }
}
