mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use application::Gateway;
use async_trait::async_trait;
use common::{MockDriver, RecordingPublisher};
use domain::event::{EventPublisher, PublishError};
use domain::{
    Connector, DeviceConfig, DeviceStatus, DomainError, GatewayControl, GatewayEvent,
    SchedulingConfig, TagConfig, TagDirection,
};
use tokio::time::sleep;

// --- Test Connector ---

#[derive(Default)]
struct TestConnector {
    recorder: Arc<RecordingPublisher>,
    seeded: Arc<RecordingPublisher>,
    stopped: AtomicBool,
}

#[async_trait]
impl EventPublisher for TestConnector {
    async fn publish(&self, event: GatewayEvent) -> Result<(), PublishError> {
        self.recorder.publish(event).await
    }
}

#[async_trait]
impl Connector for TestConnector {
    fn name(&self) -> &str {
        "test"
    }

    async fn start(&self, control: Arc<dyn GatewayControl>) -> anyhow::Result<()> {
        control.initialize(self.seeded.as_ref()).await;
        Ok(())
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn device_config(id: &str) -> DeviceConfig {
    DeviceConfig::new(
        id,
        vec![
            TagConfig::new("status", 0, 8, TagDirection::Read),
            TagConfig::new("cmd", 100, 4, TagDirection::Write),
        ],
    )
}

async fn gateway_with_device(driver: &Arc<MockDriver>) -> Arc<Gateway> {
    let gateway = Arc::new(Gateway::new(SchedulingConfig::default()));
    gateway
        .add_device(device_config("plc-01"), driver.clone())
        .await
        .unwrap();
    gateway
}

#[tokio::test]
async fn test_write_request_validation() {
    let driver = MockDriver::new(128);
    let gateway = gateway_with_device(&driver).await;

    assert_eq!(
        gateway.request_tag_write("plc-99", "cmd", 100, &[1]),
        Err(DomainError::DeviceNotFound("plc-99".to_string()))
    );
    assert_eq!(
        gateway.request_tag_write("plc-01", "nope", 100, &[1]),
        Err(DomainError::TagNotFound {
            device_id: "plc-01".to_string(),
            tag_id: "nope".to_string(),
        })
    );
    assert_eq!(
        gateway.request_tag_write("plc-01", "status", 0, &[1]),
        Err(DomainError::NotWritable("status".to_string()))
    );
}

#[tokio::test]
async fn test_out_of_range_write_is_noop() {
    let driver = MockDriver::new(128);
    let gateway = gateway_with_device(&driver).await;

    assert_eq!(gateway.request_tag_write("plc-01", "cmd", 10, &[1, 2, 3]), Ok(false));
    assert_eq!(gateway.request_tag_write("plc-01", "cmd", 104, &[1]), Ok(false));

    let tag = gateway.device("plc-01").unwrap().find_tag("cmd").unwrap();
    assert!(!tag.lock().write_pending);

    // Same bytes as already pending: not dirty either
    assert_eq!(gateway.request_tag_write("plc-01", "cmd", 100, &[0, 0]), Ok(false));
    assert_eq!(gateway.request_tag_write("plc-01", "cmd", 98, &[5, 5, 5]), Ok(true));
    assert_eq!(tag.lock().current, vec![5, 0, 0, 0]);
}

#[tokio::test]
async fn test_disabled_device_rejects_writes() {
    let driver = MockDriver::new(128);
    let gateway = Gateway::new(SchedulingConfig::default());
    let mut config = device_config("plc-01");
    config.enabled = false;
    gateway.add_device(config, driver.clone()).await.unwrap();

    assert_eq!(
        gateway.request_tag_write("plc-01", "cmd", 100, &[1]),
        Err(DomainError::DeviceDisabled("plc-01".to_string()))
    );
}

#[tokio::test]
async fn test_duplicate_device_is_rejected() {
    let driver = MockDriver::new(128);
    let gateway = gateway_with_device(&driver).await;

    let result = gateway.add_device(device_config("plc-01"), driver.clone()).await;
    assert!(matches!(result, Err(DomainError::InvalidConfiguration(_))));
    assert_eq!(gateway.device_ids(), vec!["plc-01".to_string()]);
}

#[tokio::test]
async fn test_initialize_reports_status_and_every_tag() {
    let driver = MockDriver::new(128);
    let gateway = gateway_with_device(&driver).await;
    let sink = RecordingPublisher::new();

    gateway.initialize(sink.as_ref()).await;

    let events = sink.events();
    assert_eq!(events.len(), 3);
    match &events[0] {
        GatewayEvent::DeviceStatus(status) => {
            assert_eq!(status.status, DeviceStatus::Uninitialized)
        }
        other => panic!("Expected device status, got {:?}", other),
    }
    let tags: Vec<String> = sink.tag_reads().into_iter().map(|e| e.tag_id).collect();
    assert_eq!(tags, vec!["status", "cmd"]);
    assert!(sink.tag_reads().iter().all(|e| e.data.as_ref().unwrap().full));
}

#[tokio::test(start_paused = true)]
async fn test_gateway_routes_events_and_writes() {
    let driver = MockDriver::new(128);
    driver.set_memory(0, &[4; 8]);
    let gateway = gateway_with_device(&driver).await;
    let connector = Arc::new(TestConnector::default());
    gateway.add_connector(connector.clone()).await;

    gateway.start().await;
    assert!(gateway.is_running());
    // Initialized before any device came online
    assert_eq!(connector.seeded.events().len(), 3);

    sleep(Duration::from_millis(500)).await;
    assert_eq!(
        gateway.last_status("plc-01").map(|s| s.status),
        Some(DeviceStatus::Ok)
    );
    assert!(
        connector
            .recorder
            .events()
            .iter()
            .any(|e| matches!(e, GatewayEvent::DeviceStatus(s) if s.status == DeviceStatus::Ok))
    );

    assert_eq!(gateway.request_tag_write("plc-01", "cmd", 101, &[7, 7]), Ok(true));
    sleep(Duration::from_millis(100)).await;
    assert_eq!(driver.memory(100, 4), vec![0, 7, 7, 0]);
    assert_eq!(connector.recorder.tag_writes().len(), 1);

    gateway.stop().await;
    assert!(connector.stopped.load(Ordering::SeqCst));
    assert!(!gateway.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_device_added_while_running_starts_immediately() {
    let driver = MockDriver::new(128);
    let gateway = Arc::new(Gateway::new(SchedulingConfig::default()));
    gateway.start().await;

    gateway
        .add_device(device_config("plc-02"), driver.clone())
        .await
        .unwrap();
    sleep(Duration::from_millis(300)).await;
    assert_eq!(gateway.device("plc-02").unwrap().status(), DeviceStatus::Ok);

    gateway.pause_device("plc-02").unwrap();
    assert!(gateway.scheduler("plc-02").unwrap().is_paused());
    gateway.resume_device("plc-02").unwrap();

    gateway.remove_device("plc-02").await.unwrap();
    assert!(gateway.device_ids().is_empty());
    assert!(gateway.last_status("plc-02").is_none());
    assert!(matches!(
        gateway.pause_device("plc-02"),
        Err(DomainError::DeviceNotFound(_))
    ));

    gateway.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_register_device_once() {
    let driver = MockDriver::new(128);
    let gateway = Arc::new(Gateway::new(SchedulingConfig::default()));

    let adds: Vec<_> = (0..8)
        .map(|_| {
            let gateway = gateway.clone();
            let driver = driver.clone();
            tokio::spawn(async move { gateway.add_device(device_config("plc-01"), driver).await })
        })
        .collect();

    let mut registered = 0;
    for add in adds {
        match add.await.unwrap() {
            Ok(_) => registered += 1,
            Err(e) => assert!(matches!(e, DomainError::InvalidConfiguration(_))),
        }
    }
    assert_eq!(registered, 1);
    assert_eq!(gateway.device_ids(), vec!["plc-01".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_connector_added_while_running_is_started() {
    let driver = MockDriver::new(128);
    let gateway = gateway_with_device(&driver).await;
    gateway.start().await;
    sleep(Duration::from_millis(300)).await;

    let connector = Arc::new(TestConnector::default());
    gateway.add_connector(connector.clone()).await;
    // Status plus one snapshot per tag
    assert_eq!(connector.seeded.events().len(), 3);

    sleep(Duration::from_millis(300)).await;
    assert!(!connector.recorder.tag_reads().is_empty());

    gateway.stop().await;
    assert!(connector.stopped.load(Ordering::SeqCst));
}
