use std::ops::Range;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

mod coalesce;
mod publisher;

pub use coalesce::Coalesce;
pub use publisher::{EventPublisher, PublishError};

use crate::device::DeviceStatus;
use crate::driver::DriverStatus;

/// Events raised by the scheduling engine and consumed by connectors
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum GatewayEvent {
    /// A read tag was polled
    TagRead(TagEvent),
    /// A write tag was flushed to the device
    TagWrite(TagEvent),
    /// Device status after a restart attempt
    DeviceStatus(DeviceStatusEvent),
    /// Unexpected internal failure on a device
    Exception(ExceptionEvent),
}

/// Outcome of a tag read or write.
///
/// `data` is `None` for a pure status event (driver failure). A data event
/// with an empty range means the transfer succeeded without changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagEvent {
    pub device_id: String,
    pub tag_id: String,
    /// Absolute offset of the tag's first byte
    pub byte_offset: usize,
    pub data: Option<TagData>,
    pub status: DriverStatus,
    pub status_changed: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagData {
    /// Whole tag buffer at the time of the event
    pub snapshot: Bytes,
    /// Tag-relative `[start, end)` of the changed bytes
    pub range: Range<usize>,
    /// Set when the event re-seeds the complete tag rather than a diff
    pub full: bool,
}

impl TagData {
    pub fn changed_bytes(&self) -> &[u8] {
        &self.snapshot[self.range.clone()]
    }

    pub fn is_unchanged(&self) -> bool {
        self.range.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatusEvent {
    pub device_id: String,
    pub status: DeviceStatus,
    pub error: DriverStatus,
    pub error_count: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionEvent {
    pub device_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl TagEvent {
    pub fn same_tag(&self, other: &TagEvent) -> bool {
        self.device_id == other.device_id && self.tag_id == other.tag_id
    }
}

impl GatewayEvent {
    pub fn exception(device_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exception(ExceptionEvent {
            device_id: device_id.into(),
            message: message.into(),
            timestamp: Utc::now(),
        })
    }

    pub fn device_id(&self) -> &str {
        match self {
            Self::TagRead(e) | Self::TagWrite(e) => &e.device_id,
            Self::DeviceStatus(e) => &e.device_id,
            Self::Exception(e) => &e.device_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TagRead(e) | Self::TagWrite(e) => e.timestamp,
            Self::DeviceStatus(e) => e.timestamp,
            Self::Exception(e) => e.timestamp,
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::TagRead(_) => "TagRead",
            Self::TagWrite(_) => "TagWrite",
            Self::DeviceStatus(_) => "DeviceStatus",
            Self::Exception(_) => "Exception",
        }
    }
}
