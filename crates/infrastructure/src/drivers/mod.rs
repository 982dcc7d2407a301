mod simulator;

pub use simulator::{SimulatedPlc, SimulatorConfig};

use std::sync::Arc;

use domain::DomainError;
use domain::driver::TagDriver;

/// Registry of the drivers this build can instantiate by name.
pub struct DriverFactory;

impl DriverFactory {
    pub const SIMULATOR: &'static str = "simulator";

    pub fn available() -> &'static [&'static str] {
        &[Self::SIMULATOR]
    }

    /// Create a driver from its type name and free-form configuration
    pub fn create_driver(
        driver_type: &str,
        config: serde_json::Value,
    ) -> Result<Arc<dyn TagDriver>, DomainError> {
        match driver_type.to_ascii_lowercase().as_str() {
            Self::SIMULATOR => {
                let config = if config.is_null() {
                    SimulatorConfig::default()
                } else {
                    serde_json::from_value(config).map_err(|e| {
                        DomainError::InvalidConfiguration(format!("Invalid simulator config: {}", e))
                    })?
                };
                Ok(Arc::new(SimulatedPlc::new(config)))
            }
            other => Err(DomainError::InvalidConfiguration(format!(
                "Unknown driver type '{}' (available: {})",
                other,
                Self::available().join(", ")
            ))),
        }
    }
}
