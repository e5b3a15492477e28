//! Error types for endpoint operations
//!
//! Every failure an endpoint, acceptor or descriptor parser can report is a
//! variant of [`StreamError`]. Harness-level failures wrap this type.

use thiserror::Error;

/// Main error type for stream endpoint operations
#[derive(Error, Debug)]
pub enum StreamError {
    // ===== Descriptor Errors =====
    /// Descriptor string could not be parsed
    #[error("Invalid descriptor '{descriptor}': {reason}")]
    InvalidDescriptor {
        /// The offending descriptor text
        descriptor: String,
        /// Why it was rejected
        reason: String,
    },

    /// Protocol token not known to this library
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Protocol known, but the host kernel does not provide it
    #[error("Protocol {0} is not available on this host")]
    ProtocolUnavailable(String),

    // ===== Connection Errors =====
    /// Binding a listener failed
    #[error("Failed to listen on {address}: {reason}")]
    ListenFailed {
        /// Address we tried to bind
        address: String,
        /// Failure reason
        reason: String,
    },

    /// Outbound connection failed
    #[error("Failed to connect to {address}: {reason}")]
    ConnectFailed {
        /// Address we tried to reach
        address: String,
        /// Failure reason
        reason: String,
    },

    /// Host name resolved to nothing usable
    #[error("Unable to resolve {0}")]
    Resolve(String),

    /// A bounded wait expired
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// Filter-layer negotiation failed
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    // ===== Endpoint Errors =====
    /// Operation on a closed endpoint
    #[error("Endpoint is closed")]
    Closed,

    /// Remote side closed the connection
    #[error("Remote end closed the connection")]
    RemoteClosed,

    /// Control option or data path not provided by this endpoint
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Control value rejected
    #[error("Invalid control value for {option}: {value}")]
    InvalidControlValue {
        /// Option being set
        option: String,
        /// Rejected value
        value: String,
    },

    /// Library context has been shut down
    #[error("Library context has been shut down")]
    ContextShutdown,

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Shorthand for a descriptor parse failure
    pub fn invalid_descriptor(descriptor: impl Into<String>, reason: impl Into<String>) -> Self {
        StreamError::InvalidDescriptor {
            descriptor: descriptor.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is a descriptor/parse error
    pub fn is_descriptor_error(&self) -> bool {
        matches!(
            self,
            StreamError::InvalidDescriptor { .. } | StreamError::UnsupportedProtocol(_)
        )
    }

    /// Check if the peer went away
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamError::Closed | StreamError::RemoteClosed)
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            StreamError::InvalidDescriptor { .. } => "INVALID_DESCRIPTOR",
            StreamError::UnsupportedProtocol(_) => "UNSUPPORTED_PROTOCOL",
            StreamError::ProtocolUnavailable(_) => "PROTOCOL_UNAVAILABLE",
            StreamError::ListenFailed { .. } => "LISTEN_FAILED",
            StreamError::ConnectFailed { .. } => "CONNECT_FAILED",
            StreamError::Resolve(_) => "RESOLVE_FAILED",
            StreamError::Timeout { .. } => "TIMEOUT",
            StreamError::Negotiation(_) => "NEGOTIATION_FAILED",
            StreamError::Closed => "CLOSED",
            StreamError::RemoteClosed => "REMOTE_CLOSED",
            StreamError::NotSupported(_) => "NOT_SUPPORTED",
            StreamError::InvalidControlValue { .. } => "INVALID_CONTROL_VALUE",
            StreamError::ContextShutdown => "CONTEXT_SHUTDOWN",
            StreamError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for endpoint operations
pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = StreamError::Timeout { duration_ms: 2000 };
        assert_eq!(err.error_code(), "TIMEOUT");
        assert!(err.to_string().contains("2000"));
    }

    #[test]
    fn test_descriptor_error_classification() {
        assert!(StreamError::invalid_descriptor("tcp", "missing port").is_descriptor_error());
        assert!(StreamError::UnsupportedProtocol("ssl".into()).is_descriptor_error());
        assert!(!StreamError::Closed.is_descriptor_error());
    }

    #[test]
    fn test_is_closed() {
        assert!(StreamError::Closed.is_closed());
        assert!(StreamError::RemoteClosed.is_closed());
        assert!(!StreamError::Negotiation("x".into()).is_closed());
    }
}
