//! streamio core types
//!
//! Shared vocabulary for the streamio workspace:
//!
//! - [`descriptor`] - structured endpoint descriptors and their wire form
//! - [`address`] - `family,address,port` address strings
//! - [`control`] - control-plane requests and options
//! - [`config`] - endpoint configuration
//! - [`error`] - the [`StreamError`] type
//!
//! # Example
//!
//! ```rust
//! use streamio_core::{Descriptor, Protocol};
//!
//! let d: Descriptor = "tcp,localhost,".parse().unwrap();
//! assert_eq!(d.protocol(), Protocol::Tcp);
//! assert_eq!(d.with_port(4001).to_string(), "tcp,localhost,4001");
//! ```

#![warn(missing_docs)]

pub mod address;
pub mod config;
pub mod control;
pub mod descriptor;
pub mod error;

pub use address::{format_addr, format_addrs, parse_addrs};
pub use config::{
    EndpointConfig, EndpointConfigBuilder, SctpConfig, TelnetConfig, DEFAULT_READ_BUFFER,
    DEFAULT_TIMEOUT_MS, UDP_MAX_PAYLOAD,
};
pub use control::{ControlDepth, ControlOption, ControlRequest, StreamCounts};
pub use descriptor::{Descriptor, Filter, Protocol, Transport};
pub use error::{Result, StreamError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
