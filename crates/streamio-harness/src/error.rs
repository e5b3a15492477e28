//! Error types for harness runs
//!
//! A harness run fails either because an endpoint operation failed
//! ([`StreamError`]) or because an assertion did not hold. Assertion
//! failures carry the expected and actual values so the test output says
//! exactly what differed.

use thiserror::Error;

use streamio_core::StreamError;

use crate::assert::{DataMismatch, Mismatch};

/// Main error type for harness runs
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Endpoint, acceptor or descriptor failure
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// A compared value differed from its expectation
    #[error(transparent)]
    Mismatch(#[from] Mismatch),

    /// Transferred data differed from what was sent
    #[error(transparent)]
    DataMismatch(#[from] DataMismatch),

    /// A harness stage did not finish in time
    #[error("Timed out during {stage} after {duration_ms}ms")]
    Timeout {
        /// Stage that was waiting (accept, connect, read, ...)
        stage: &'static str,
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// The process-wide context was initialised twice with different settings
    #[error("Library context already initialised")]
    AlreadyInitialized,
}

impl HarnessError {
    /// Check if this failure is an assertion rather than an I/O problem
    pub fn is_assertion(&self) -> bool {
        matches!(self, HarnessError::Mismatch(_) | HarnessError::DataMismatch(_))
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            HarnessError::Stream(e) => e.error_code(),
            HarnessError::Mismatch(_) => "MISMATCH",
            HarnessError::DataMismatch(_) => "DATA_MISMATCH",
            HarnessError::Timeout { .. } => "TIMEOUT",
            HarnessError::AlreadyInitialized => "ALREADY_INITIALIZED",
        }
    }
}

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;
