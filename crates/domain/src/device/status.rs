use serde::{Deserialize, Serialize};

/// Operational status of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    /// No successful restart yet
    Uninitialized,
    /// Connected; regular reads and writes may be scheduled
    Ok,
    /// Last restart attempt failed
    Error,
    /// Disabled by configuration
    Disabled,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Ok => "OK",
            Self::Error => "ERROR",
            Self::Disabled => "DISABLED",
        }
    }

    pub fn is_schedulable(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Status in which the restart routine should keep trying
    pub fn needs_recovery(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Error)
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::Uninitialized
    }
}
