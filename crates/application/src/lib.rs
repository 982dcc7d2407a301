//! Application layer - device scheduling and the gateway façade

pub mod engine;
pub mod events;
pub mod gateway;
pub mod scheduler;

pub use engine::ScheduleEngine;
pub use events::{EventFanout, StatusCache};
pub use gateway::Gateway;
pub use scheduler::DeviceScheduler;
