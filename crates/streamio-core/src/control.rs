//! Control-plane queries
//!
//! Endpoints answer non-data questions (addresses, stream counts, write
//! limits) through a single string-valued control call. A request names
//! which layer of the stack should answer, whether it is a get or a set,
//! the option, and an optional value.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, StreamError};

/// Which layer of a protocol stack a control request is aimed at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlDepth {
    /// The n-th layer from the top (0 is the outermost)
    Layer(usize),
    /// The first layer, top down, that understands the option
    First,
}

impl ControlDepth {
    /// Depth to forward to the next layer down, or `None` if this layer is the target
    pub fn descend(self) -> Option<ControlDepth> {
        match self {
            ControlDepth::Layer(0) => None,
            ControlDepth::Layer(n) => Some(ControlDepth::Layer(n - 1)),
            ControlDepth::First => Some(ControlDepth::First),
        }
    }

    /// Whether this layer is the addressed one
    pub fn targets_here(self) -> bool {
        matches!(self, ControlDepth::Layer(0) | ControlDepth::First)
    }
}

impl From<usize> for ControlDepth {
    fn from(depth: usize) -> Self {
        ControlDepth::Layer(depth)
    }
}

/// Options understood by the control interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlOption {
    /// Active stream counts, `instreams=N,ostreams=M` (SCTP)
    Streams,
    /// Local address string
    LocalAddr,
    /// Remote address string
    RemoteAddr,
    /// Local port (acceptors)
    LocalPort,
    /// Largest number of bytes a single write will carry
    MaxWritePacket,
    /// Disable Nagle (TCP); value `"1"`/`"0"`
    NoDelay,
    /// Send a break to the peer (Telnet)
    SendBreak,
    /// Number of breaks received from the peer (Telnet)
    BreaksReceived,
}

impl ControlOption {
    /// Name used in log messages and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlOption::Streams => "streams",
            ControlOption::LocalAddr => "laddr",
            ControlOption::RemoteAddr => "raddr",
            ControlOption::LocalPort => "lport",
            ControlOption::MaxWritePacket => "max_write_packet",
            ControlOption::NoDelay => "nodelay",
            ControlOption::SendBreak => "send_break",
            ControlOption::BreaksReceived => "breaks_received",
        }
    }

    /// Error for an option this layer does not handle
    pub fn unsupported(&self) -> StreamError {
        StreamError::NotSupported(format!("control {}", self.as_str()))
    }
}

impl fmt::Display for ControlOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    /// Target layer
    pub depth: ControlDepth,
    /// `true` for a query, `false` for a set
    pub get: bool,
    /// Option being addressed
    pub option: ControlOption,
    /// Argument for sets (and some gets)
    pub value: Option<String>,
}

impl ControlRequest {
    /// A get request
    pub fn get(depth: impl Into<ControlDepth>, option: ControlOption) -> Self {
        Self {
            depth: depth.into(),
            get: true,
            option,
            value: None,
        }
    }

    /// A set request
    pub fn set(depth: impl Into<ControlDepth>, option: ControlOption, value: impl Into<String>) -> Self {
        Self {
            depth: depth.into(),
            get: false,
            option,
            value: Some(value.into()),
        }
    }

    /// The same request aimed one layer lower
    pub fn descend(&self) -> Option<Self> {
        self.depth.descend().map(|depth| Self {
            depth,
            ..self.clone()
        })
    }

    /// Value of a set request, or an error if it is missing
    pub fn require_value(&self) -> Result<&str> {
        self.value.as_deref().ok_or_else(|| StreamError::InvalidControlValue {
            option: self.option.to_string(),
            value: String::new(),
        })
    }
}

/// SCTP stream counts as reported by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCounts {
    /// Inbound streams
    pub instreams: u16,
    /// Outbound streams
    pub ostreams: u16,
}

impl fmt::Display for StreamCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instreams={},ostreams={}", self.instreams, self.ostreams)
    }
}

/// Parse a boolean control value
pub fn parse_bool(option: ControlOption, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        other => Err(StreamError::InvalidControlValue {
            option: option.to_string(),
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_counts_display() {
        let counts = StreamCounts {
            instreams: 1,
            ostreams: 1,
        };
        assert_eq!(counts.to_string(), "instreams=1,ostreams=1");
    }

    #[test]
    fn test_depth_descend() {
        assert_eq!(ControlDepth::Layer(0).descend(), None);
        assert_eq!(ControlDepth::Layer(2).descend(), Some(ControlDepth::Layer(1)));
        assert_eq!(ControlDepth::First.descend(), Some(ControlDepth::First));
        assert!(ControlDepth::First.targets_here());
        assert!(!ControlDepth::Layer(1).targets_here());
    }

    #[test]
    fn test_request_descend_keeps_option() {
        let req = ControlRequest::get(1, ControlOption::Streams);
        let lower = req.descend().unwrap();
        assert_eq!(lower.depth, ControlDepth::Layer(0));
        assert_eq!(lower.option, ControlOption::Streams);
        assert!(lower.descend().is_none());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool(ControlOption::NoDelay, "1").unwrap());
        assert!(!parse_bool(ControlOption::NoDelay, "off").unwrap());
        assert!(parse_bool(ControlOption::NoDelay, "maybe").is_err());
    }
}
