//! Failure classification shared by every error type in the crate.

use serde::{Deserialize, Serialize};

/// How a failure should be treated by whoever drives a reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Stop the current cycle; a retry will not help until something changes.
    Fatal,
    /// Stop the current cycle; running it again later may succeed.
    Retryable,
    /// Log and carry on.
    Warning,
}

impl ErrorClass {
    /// Returns the string representation for log output.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Fatal => "fatal",
            ErrorClass::Retryable => "retryable",
            ErrorClass::Warning => "warning",
        }
    }

    /// Whether the cycle must stop.
    pub fn aborts_cycle(&self) -> bool {
        !matches!(self, ErrorClass::Warning)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
