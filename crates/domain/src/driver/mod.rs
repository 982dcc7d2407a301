mod fault;
mod tag_driver;

pub use fault::{DriverFault, DriverStatus, UNEXPECTED_FAULT_CODE};
pub use tag_driver::{DriverResult, TagDriver, TransferLimits};
