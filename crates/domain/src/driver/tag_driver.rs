use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::DriverFault;
use crate::device::DeviceConfig;
use crate::tag::TagConfig;

pub type DriverResult = Result<(), DriverFault>;

/// Per-transaction byte budgets negotiated with a device (PDU size).
/// Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLimits {
    pub read: usize,
    pub write: usize,
}

/// Field-bus driver contract consumed by the scheduling engine.
///
/// `absolute_start` and `len` always lie within the tag's byte range; the
/// buffer is tag-relative (index 0 is the tag's first byte).
#[async_trait]
pub trait TagDriver: Send + Sync {
    async fn start_interface(&self) -> DriverResult;

    async fn stop_interface(&self) -> DriverResult;

    async fn connect(&self, device: &DeviceConfig) -> DriverResult;

    async fn disconnect(&self, device: &DeviceConfig) -> DriverResult;

    async fn read_tag(
        &self,
        device: &DeviceConfig,
        tag: &TagConfig,
        buffer: &mut [u8],
        absolute_start: usize,
        len: usize,
    ) -> DriverResult;

    async fn write_tag(
        &self,
        device: &DeviceConfig,
        tag: &TagConfig,
        buffer: &[u8],
        absolute_start: usize,
        len: usize,
    ) -> DriverResult;

    /// Human readable description of a driver return code
    fn error_message(&self, code: i32) -> String;

    /// Budgets negotiated during `connect`
    fn transfer_limits(&self, _device: &DeviceConfig) -> TransferLimits {
        TransferLimits::default()
    }
}
