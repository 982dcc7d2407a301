use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Direction of data flow for a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagDirection {
    /// Polled from the device and published downstream
    Read,
    /// Written to the device on external request
    Write,
}

impl TagDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Static description of a contiguous byte region on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagConfig {
    pub id: String,
    pub byte_offset: usize,
    pub size: usize,
    pub direction: TagDirection,
    /// Scheduling weight of a read tag; a higher weight is polled less often.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

impl TagConfig {
    pub fn new(id: impl Into<String>, byte_offset: usize, size: usize, direction: TagDirection) -> Self {
        Self {
            id: id.into(),
            byte_offset,
            size,
            direction,
            weight: default_weight(),
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Absolute end offset (exclusive)
    pub fn end(&self) -> usize {
        self.byte_offset + self.size
    }

    pub fn is_read(&self) -> bool {
        self.direction == TagDirection::Read
    }

    pub fn is_write(&self) -> bool {
        self.direction == TagDirection::Write
    }

    /// Check that `[start, start + len)` lies within the tag
    pub fn contains(&self, start: usize, len: usize) -> bool {
        start >= self.byte_offset && start + len <= self.end()
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(DomainError::InvalidConfiguration(
                "Tag ID cannot be empty".to_string(),
            ));
        }
        if self.size == 0 {
            return Err(DomainError::InvalidConfiguration(format!(
                "Tag {} has zero size",
                self.id
            )));
        }
        if self.weight == 0 {
            return Err(DomainError::InvalidConfiguration(format!(
                "Tag {} must have a positive weight",
                self.id
            )));
        }
        Ok(())
    }
}
