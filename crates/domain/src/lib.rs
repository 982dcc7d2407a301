//! Domain layer - data model and contracts of the tag gateway
//!
//! This crate contains:
//! - Device and tag runtime state (byte buffers, error bookkeeping, credit)
//! - The field-bus driver contract
//! - Gateway events and their coalescing rules
//! - Scheduling values and settings
//!
//! Principles:
//! - No I/O; drivers and publishers are injected from outside
//! - Every piece of mutable state sits behind its owner's lock

pub mod control;
pub mod device;
pub mod driver;
pub mod error;
pub mod event;
pub mod schedule;
pub mod tag;

// Re-export commonly used types
pub use control::{Connector, GatewayControl};
pub use device::{Device, DeviceConfig, DeviceStatus};
pub use driver::{DriverFault, DriverStatus, TagDriver, TransferLimits};
pub use error::DomainError;
pub use event::{EventPublisher, GatewayEvent};
pub use schedule::{ScheduleWait, SchedulingConfig, TagSchedule};
pub use tag::{Tag, TagConfig, TagDirection};
