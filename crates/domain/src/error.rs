use thiserror::Error;

/// Domain-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Tag not found: {device_id}/{tag_id}")]
    TagNotFound { device_id: String, tag_id: String },

    #[error("Tag {0} is not a write tag")]
    NotWritable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Device is disabled: {0}")]
    DeviceDisabled(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DomainError>;
