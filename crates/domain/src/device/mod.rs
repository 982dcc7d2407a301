mod config;
mod entity;
mod status;

pub use config::DeviceConfig;
pub use entity::{Device, DeviceState};
pub use status::DeviceStatus;
