#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use domain::driver::{DriverFault, DriverResult, TransferLimits};
use domain::event::{EventPublisher, GatewayEvent, PublishError, TagEvent};
use domain::{DeviceConfig, SchedulingConfig, TagConfig, TagDriver};

// --- Mock Driver with Fault Injection ---

#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub tag_id: String,
    pub start: usize,
    pub bytes: Vec<u8>,
}

/// In-memory device: a flat byte array addressed by absolute offset.
pub struct MockDriver {
    memory: Mutex<Vec<u8>>,
    reads: Mutex<Vec<Transfer>>,
    writes: Mutex<Vec<Transfer>>,
    limits: Mutex<TransferLimits>,
    read_delay: Mutex<Duration>,
    fail_reads: AtomicUsize,
    fail_writes: AtomicUsize,
    fail_writes_from: Mutex<Option<usize>>,
    fail_connects: AtomicUsize,
    panic_next_read: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockDriver {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            memory: Mutex::new(vec![0; size]),
            reads: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            limits: Mutex::new(TransferLimits::default()),
            read_delay: Mutex::new(Duration::ZERO),
            fail_reads: AtomicUsize::new(0),
            fail_writes: AtomicUsize::new(0),
            fail_writes_from: Mutex::new(None),
            fail_connects: AtomicUsize::new(0),
            panic_next_read: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn set_memory(&self, offset: usize, bytes: &[u8]) {
        self.memory.lock().unwrap()[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn memory(&self, offset: usize, len: usize) -> Vec<u8> {
        self.memory.lock().unwrap()[offset..offset + len].to_vec()
    }

    pub fn set_limits(&self, read: usize, write: usize) {
        *self.limits.lock().unwrap() = TransferLimits { read, write };
    }

    /// Every read call takes this long (virtual time in paused tests).
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    pub fn fail_next_reads(&self, count: usize) {
        self.fail_reads.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.fail_writes.store(count, Ordering::SeqCst);
    }

    /// Every write starting at or above `offset` fails until cleared.
    pub fn fail_writes_from(&self, offset: Option<usize>) {
        *self.fail_writes_from.lock().unwrap() = offset;
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.fail_connects.store(count, Ordering::SeqCst);
    }

    pub fn panic_on_next_read(&self) {
        self.panic_next_read.store(true, Ordering::SeqCst);
    }

    pub fn reads(&self) -> Vec<Transfer> {
        self.reads.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Transfer> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.reads.lock().unwrap().clear();
        self.writes.lock().unwrap().clear();
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TagDriver for MockDriver {
    async fn start_interface(&self) -> DriverResult {
        Ok(())
    }

    async fn stop_interface(&self) -> DriverResult {
        Ok(())
    }

    async fn connect(&self, _device: &DeviceConfig) -> DriverResult {
        if Self::take_failure(&self.fail_connects) {
            return Err(DriverFault::Code(7));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, _device: &DeviceConfig) -> DriverResult {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_tag(
        &self,
        _device: &DeviceConfig,
        tag: &TagConfig,
        buffer: &mut [u8],
        absolute_start: usize,
        len: usize,
    ) -> DriverResult {
        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.panic_next_read.swap(false, Ordering::SeqCst) {
            panic!("bus exploded");
        }
        if Self::take_failure(&self.fail_reads) {
            return Err(DriverFault::Code(42));
        }

        let bytes = self.memory(absolute_start, len);
        let relative = absolute_start - tag.byte_offset;
        buffer[relative..relative + len].copy_from_slice(&bytes);
        self.reads.lock().unwrap().push(Transfer {
            tag_id: tag.id.clone(),
            start: absolute_start,
            bytes,
        });
        Ok(())
    }

    async fn write_tag(
        &self,
        _device: &DeviceConfig,
        tag: &TagConfig,
        buffer: &[u8],
        absolute_start: usize,
        len: usize,
    ) -> DriverResult {
        if Self::take_failure(&self.fail_writes) {
            return Err(DriverFault::Code(43));
        }
        if self
            .fail_writes_from
            .lock()
            .unwrap()
            .is_some_and(|from| absolute_start >= from)
        {
            return Err(DriverFault::Code(43));
        }

        let relative = absolute_start - tag.byte_offset;
        let bytes = buffer[relative..relative + len].to_vec();
        self.set_memory(absolute_start, &bytes);
        self.writes.lock().unwrap().push(Transfer {
            tag_id: tag.id.clone(),
            start: absolute_start,
            bytes,
        });
        Ok(())
    }

    fn error_message(&self, code: i32) -> String {
        format!("mock error {code}")
    }

    fn transfer_limits(&self, _device: &DeviceConfig) -> TransferLimits {
        *self.limits.lock().unwrap()
    }
}

// --- Mock Event Publisher ---

#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<GatewayEvent>>,
    reject_tag_events: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<GatewayEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<GatewayEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    /// Fails every tag event from now on; other events are still recorded.
    pub fn reject_tag_events(&self) {
        self.reject_tag_events.store(true, Ordering::SeqCst);
    }

    pub fn tag_reads(&self) -> Vec<TagEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                GatewayEvent::TagRead(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    pub fn tag_writes(&self) -> Vec<TagEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                GatewayEvent::TagWrite(e) => Some(e),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: GatewayEvent) -> Result<(), PublishError> {
        let is_tag_event = matches!(event, GatewayEvent::TagRead(_) | GatewayEvent::TagWrite(_));
        if is_tag_event && self.reject_tag_events.load(Ordering::SeqCst) {
            return Err("downstream rejected event".into());
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// --- Helpers ---

/// Settings without pacing so every call to `schedule_next` services a tag.
pub fn unpaced_settings() -> SchedulingConfig {
    SchedulingConfig {
        min_read_interval_ms: 0,
        min_write_interval_ms: 0,
        error_backoff_ms: 0,
        restart_interval_ms: 0,
        ..SchedulingConfig::default()
    }
}
