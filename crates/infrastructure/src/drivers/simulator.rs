use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::info;

use domain::driver::{DriverFault, DriverResult, TagDriver, TransferLimits};
use domain::{DeviceConfig, TagConfig};

pub const ERR_NOT_CONNECTED: i32 = 1;
pub const ERR_OUT_OF_RANGE: i32 = 2;

#[derive(Debug, Deserialize, Clone)]
pub struct SimulatorConfig {
    #[serde(default = "default_memory_size")]
    pub memory_size: usize,
    /// Negotiated PDU sizes; 0 means unlimited
    #[serde(default)]
    pub read_budget: usize,
    #[serde(default)]
    pub write_budget: usize,
    /// Byte offsets that count up once per tick
    #[serde(default)]
    pub counters: Vec<usize>,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Artificial delay of every transfer
    #[serde(default)]
    pub latency_ms: u64,
}

fn default_memory_size() -> usize {
    4096
}

fn default_tick_ms() -> u64 {
    1000
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            memory_size: default_memory_size(),
            read_budget: 0,
            write_budget: 0,
            counters: Vec::new(),
            tick_ms: default_tick_ms(),
            latency_ms: 0,
        }
    }
}

/// In-process PLC: one flat memory area shared by all tags.
pub struct SimulatedPlc {
    config: SimulatorConfig,
    memory: Mutex<Vec<u8>>,
    connected: AtomicBool,
    start_time: Instant,
}

impl SimulatedPlc {
    pub fn new(config: SimulatorConfig) -> Self {
        let memory = vec![0; config.memory_size];
        Self {
            config,
            memory: Mutex::new(memory),
            connected: AtomicBool::new(false),
            start_time: Instant::now(),
        }
    }

    fn memory(&self) -> MutexGuard<'_, Vec<u8>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, absolute_start: usize, len: usize) -> DriverResult {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DriverFault::Code(ERR_NOT_CONNECTED));
        }
        if absolute_start + len > self.config.memory_size {
            return Err(DriverFault::Code(ERR_OUT_OF_RANGE));
        }
        Ok(())
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    fn advance_counters(&self, memory: &mut [u8]) {
        let ticks = self.start_time.elapsed().as_millis() / u128::from(self.config.tick_ms.max(1));
        for &offset in &self.config.counters {
            if let Some(byte) = memory.get_mut(offset) {
                *byte = (ticks % 256) as u8;
            }
        }
    }
}

#[async_trait]
impl TagDriver for SimulatedPlc {
    async fn start_interface(&self) -> DriverResult {
        Ok(())
    }

    async fn stop_interface(&self) -> DriverResult {
        Ok(())
    }

    async fn connect(&self, device: &DeviceConfig) -> DriverResult {
        info!(device_id = %device.id, memory_size = self.config.memory_size, "Simulator connected");
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceConfig) -> DriverResult {
        info!(device_id = %device.id, "Simulator disconnected");
        self.connected.store(false, Ordering::SeqCst);
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
        self.simulate_latency().await;
        self.check(absolute_start, len)?;

        let mut memory = self.memory();
        self.advance_counters(&mut memory);
        let relative = absolute_start - tag.byte_offset;
        buffer[relative..relative + len].copy_from_slice(&memory[absolute_start..absolute_start + len]);
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
        self.simulate_latency().await;
        self.check(absolute_start, len)?;

        let relative = absolute_start - tag.byte_offset;
        self.memory()[absolute_start..absolute_start + len]
            .copy_from_slice(&buffer[relative..relative + len]);
        Ok(())
    }

    fn error_message(&self, code: i32) -> String {
        match code {
            ERR_NOT_CONNECTED => "simulator not connected".to_string(),
            ERR_OUT_OF_RANGE => "address outside simulated memory".to_string(),
            other => format!("unknown simulator error {other}"),
        }
    }

    fn transfer_limits(&self, _device: &DeviceConfig) -> TransferLimits {
        TransferLimits {
            read: self.config.read_budget,
            write: self.config.write_budget,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::TagDirection;

    fn device() -> DeviceConfig {
        DeviceConfig::new("sim-01", vec![])
    }

    #[tokio::test]
    async fn test_write_then_read_back() {
        let plc = SimulatedPlc::new(SimulatorConfig::default());
        let device = device();
        let out = TagConfig::new("out", 10, 4, TagDirection::Write);
        let input = TagConfig::new("in", 8, 8, TagDirection::Read);
        plc.connect(&device).await.unwrap();

        plc.write_tag(&device, &out, &[0, 5, 6, 0], 11, 2).await.unwrap();

        let mut buffer = [0u8; 8];
        plc.read_tag(&device, &input, &mut buffer, 8, 8).await.unwrap();
        assert_eq!(buffer, [0, 0, 0, 5, 6, 0, 0, 0]);
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let plc = SimulatedPlc::new(SimulatorConfig::default());
        let tag = TagConfig::new("in", 0, 4, TagDirection::Read);
        let mut buffer = [0u8; 4];

        let result = plc.read_tag(&device(), &tag, &mut buffer, 0, 4).await;
        assert_eq!(result, Err(DriverFault::Code(ERR_NOT_CONNECTED)));
        assert_eq!(plc.error_message(ERR_NOT_CONNECTED), "simulator not connected");
    }

    #[tokio::test]
    async fn test_out_of_range_is_reported() {
        let plc = SimulatedPlc::new(SimulatorConfig {
            memory_size: 16,
            ..SimulatorConfig::default()
        });
        let device = device();
        let tag = TagConfig::new("in", 12, 8, TagDirection::Read);
        plc.connect(&device).await.unwrap();

        let mut buffer = [0u8; 8];
        let result = plc.read_tag(&device, &tag, &mut buffer, 12, 8).await;
        assert_eq!(result, Err(DriverFault::Code(ERR_OUT_OF_RANGE)));
    }

    #[test]
    fn test_budgets_become_transfer_limits() {
        let plc = SimulatedPlc::new(SimulatorConfig {
            read_budget: 240,
            write_budget: 220,
            ..SimulatorConfig::default()
        });
        assert_eq!(
            plc.transfer_limits(&device()),
            TransferLimits { read: 240, write: 220 }
        );
    }
}
