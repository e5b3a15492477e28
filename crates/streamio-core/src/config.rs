//! Configuration types for endpoints
//!
//! Settings that shape how endpoints are opened: timeouts, SCTP stream
//! counts and Telnet options. Everything has a default, so an empty
//! configuration works out of the box.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bound on connect/accept/negotiation waits
pub const DEFAULT_TIMEOUT_MS: u64 = 10000;

/// Default read buffer size for stream endpoints
pub const DEFAULT_READ_BUFFER: usize = 4096;

/// Largest UDP payload that fits in one IPv4 datagram
pub const UDP_MAX_PAYLOAD: usize = 65507;

/// Default SCTP inbound/outbound stream count
pub const DEFAULT_SCTP_STREAMS: u16 = 1;

/// Endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Bound on connect and negotiation waits
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub connect_timeout: Duration,

    /// Read buffer size for stream endpoints
    #[serde(default = "default_read_buffer")]
    pub read_buffer_size: usize,

    /// SCTP association settings
    #[serde(default)]
    pub sctp: SctpConfig,

    /// Telnet filter settings
    #[serde(default)]
    pub telnet: TelnetConfig,
}

fn default_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT_MS)
}

fn default_read_buffer() -> usize {
    DEFAULT_READ_BUFFER
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_timeout(),
            read_buffer_size: DEFAULT_READ_BUFFER,
            sctp: SctpConfig::default(),
            telnet: TelnetConfig::default(),
        }
    }
}

/// SCTP association settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SctpConfig {
    /// Maximum inbound streams to accept
    pub instreams: u16,
    /// Outbound streams to request
    pub ostreams: u16,
}

impl Default for SctpConfig {
    fn default() -> Self {
        Self {
            instreams: DEFAULT_SCTP_STREAMS,
            ostreams: DEFAULT_SCTP_STREAMS,
        }
    }
}

/// Telnet filter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelnetConfig {
    /// Offer and request SUPPRESS-GO-AHEAD
    pub suppress_go_ahead: bool,
    /// Offer and request BINARY transmission
    pub binary: bool,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            suppress_go_ahead: true,
            binary: true,
        }
    }
}

/// Builder for EndpointConfig
#[derive(Debug, Default)]
pub struct EndpointConfigBuilder {
    config: EndpointConfig,
}

impl EndpointConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect/negotiation timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the read buffer size (at least one byte)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(1);
        self
    }

    /// Set SCTP stream counts
    pub fn sctp_streams(mut self, instreams: u16, ostreams: u16) -> Self {
        self.config.sctp = SctpConfig {
            instreams,
            ostreams,
        };
        self
    }

    /// Set Telnet options
    pub fn telnet(mut self, telnet: TelnetConfig) -> Self {
        self.config.telnet = telnet;
        self
    }

    /// Build the configuration
    pub fn build(self) -> EndpointConfig {
        self.config
    }
}

/// Serde helpers for `Duration` fields written in humantime form ("10s", "250ms")
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize a duration as a humantime string
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    /// Deserialize a duration from a humantime string
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EndpointConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(config.sctp.instreams, 1);
        assert_eq!(config.sctp.ostreams, 1);
        assert!(config.telnet.suppress_go_ahead);
    }

    #[test]
    fn test_config_builder() {
        let config = EndpointConfigBuilder::new()
            .connect_timeout(Duration::from_secs(2))
            .sctp_streams(4, 2)
            .read_buffer_size(0)
            .build();

        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.sctp, SctpConfig { instreams: 4, ostreams: 2 });
        assert_eq!(config.read_buffer_size, 1);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: EndpointConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER);
        assert_eq!(config.sctp, SctpConfig::default());
    }

    #[test]
    fn test_humantime_timeout() {
        let config: EndpointConfig =
            serde_json::from_str(r#"{"connect_timeout": "250ms"}"#).unwrap();
        assert_eq!(config.connect_timeout, Duration::from_millis(250));

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"250ms\""));
    }
}
