use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::tag::TagConfig;

/// Static configuration of one physical device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<TagConfig>,
    /// Read large tags in chunks of the negotiated read budget
    #[serde(default)]
    pub partial_reads: bool,
    /// Split writes into spans bounded by the negotiated write budget
    #[serde(default = "default_enabled")]
    pub optimize_writes: bool,
}

fn default_enabled() -> bool {
    true
}

impl DeviceConfig {
    pub fn new(id: impl Into<String>, tags: Vec<TagConfig>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            tags,
            partial_reads: false,
            optimize_writes: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(DomainError::InvalidConfiguration(
                "Device ID cannot be empty".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for tag in &self.tags {
            tag.validate()?;
            if !seen.insert(tag.id.as_str()) {
                return Err(DomainError::InvalidConfiguration(format!(
                    "Duplicate tag {} on device {}",
                    tag.id, self.id
                )));
            }
        }
        Ok(())
    }
}
