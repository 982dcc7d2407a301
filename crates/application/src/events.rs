use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use tracing::error;

use domain::event::{DeviceStatusEvent, EventPublisher, GatewayEvent, PublishError};

/// Observer list: every subscriber sees every event, in subscription order.
///
/// A subscriber that fails or panics does not prevent the remaining ones
/// from being notified; the failures are reported together afterwards.
#[derive(Default)]
pub struct EventFanout {
    subscribers: RwLock<Vec<Arc<dyn EventPublisher>>>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventPublisher>) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl EventPublisher for EventFanout {
    async fn publish(&self, event: GatewayEvent) -> Result<(), PublishError> {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failures = Vec::new();
        for subscriber in &subscribers {
            let outcome = AssertUnwindSafe(subscriber.publish(event.clone()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(event = event.event_type(), error = %e, "Subscriber failed");
                    failures.push(e.to_string());
                }
                Err(_) => {
                    error!(event = event.event_type(), "Subscriber panicked");
                    failures.push("subscriber panicked".to_string());
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "{} of {} subscribers failed: {}",
                failures.len(),
                subscribers.len(),
                failures.join("; ")
            )
            .into())
        }
    }
}

/// Last known status of every device, shared by all schedulers.
/// Answers initialization requests without touching the devices.
#[derive(Default)]
pub struct StatusCache {
    statuses: DashMap<String, DeviceStatusEvent>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceStatusEvent> {
        self.statuses.get(device_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, device_id: &str) {
        self.statuses.remove(device_id);
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

#[async_trait]
impl EventPublisher for StatusCache {
    async fn publish(&self, event: GatewayEvent) -> Result<(), PublishError> {
        if let GatewayEvent::DeviceStatus(status) = event {
            self.statuses.insert(status.device_id.clone(), status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::DeviceStatus;
    use domain::driver::DriverStatus;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl EventPublisher for Recorder {
        async fn publish(&self, event: GatewayEvent) -> Result<(), PublishError> {
            self.0.lock().unwrap().push(event.event_type().to_string());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventPublisher for Failing {
        async fn publish(&self, _event: GatewayEvent) -> Result<(), PublishError> {
            Err("downstream offline".into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl EventPublisher for Panicking {
        async fn publish(&self, _event: GatewayEvent) -> Result<(), PublishError> {
            panic!("subscriber bug");
        }
    }

    fn status_event(device: &str, status: DeviceStatus) -> GatewayEvent {
        GatewayEvent::DeviceStatus(DeviceStatusEvent {
            device_id: device.to_string(),
            status,
            error: DriverStatus::ok(),
            error_count: 0,
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_failing_subscribers_do_not_block_others() {
        let fanout = EventFanout::new();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        fanout.subscribe(Arc::new(Failing));
        fanout.subscribe(Arc::new(Panicking));
        fanout.subscribe(recorder.clone());

        let result = fanout
            .publish(GatewayEvent::exception("plc-01", "test"))
            .await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().starts_with("2 of 3"));
        assert_eq!(*recorder.0.lock().unwrap(), vec!["Exception".to_string()]);
    }

    #[tokio::test]
    async fn test_status_cache_keeps_latest_per_device() {
        let cache = StatusCache::new();
        cache
            .publish(status_event("plc-01", DeviceStatus::Error))
            .await
            .unwrap();
        cache
            .publish(status_event("plc-01", DeviceStatus::Ok))
            .await
            .unwrap();
        cache
            .publish(GatewayEvent::exception("plc-02", "ignored"))
            .await
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("plc-01").unwrap().status, DeviceStatus::Ok);
        assert!(cache.get("plc-02").is_none());
    }
}
