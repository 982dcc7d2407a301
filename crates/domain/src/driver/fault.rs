use serde::Serialize;
use thiserror::Error;

/// Reserved code for failures that did not come with a driver return code
/// (native errors, panics inside a driver call).
pub const UNEXPECTED_FAULT_CODE: i32 = -1;

/// Failure reported by a driver call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverFault {
    /// Driver-specific non-zero return code
    #[error("driver returned code {0}")]
    Code(i32),

    /// Failure raised by the underlying library rather than returned as a code
    #[error("unexpected driver failure: {0}")]
    Native(String),
}

/// Uniform `(code, description)` pair; code `0` means success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriverStatus {
    pub code: i32,
    pub message: String,
}

impl DriverStatus {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(UNEXPECTED_FAULT_CODE, message)
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl std::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "code {}: {}", self.code, self.message)
        }
    }
}
