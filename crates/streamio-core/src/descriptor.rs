//! Endpoint descriptors
//!
//! A descriptor names a protocol stack and the address it runs on. The
//! structured form ([`Descriptor`]) is what the rest of the workspace works
//! with; the comma-separated wire form only appears at the boundary:
//!
//! ```text
//! [filter,]...protocol[,host],port
//!
//! tcp,localhost,0        connect/accept on localhost, port 0
//! sctp,0                 accept on all addresses, ephemeral port
//! telnet,sctp,localhost, telnet over sctp, port still to be filled in
//! ```
//!
//! An empty trailing port marks a descriptor whose port is supplied later,
//! usually by the harness once the acceptor knows which port it got.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StreamError};

/// Transport protocols an endpoint can run directly on top of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Stream over TCP
    Tcp,
    /// Datagrams over UDP, demultiplexed per remote address on the accept side
    Udp,
    /// One-to-one style SCTP association
    Sctp,
}

impl Protocol {
    /// Token used in the wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            other => Err(StreamError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// A filter layer stacked on top of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    /// Telnet option negotiation and IAC escaping
    Telnet,
}

impl Filter {
    /// Token used in the wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            Filter::Telnet => "telnet",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "telnet" => Some(Filter::Telnet),
            _ => None,
        }
    }
}

/// Transport part of a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transport {
    /// Transport protocol
    pub protocol: Protocol,
    /// Host name or address; `None` means all local addresses
    pub host: Option<String>,
    /// Port; `None` means still to be filled in
    pub port: Option<u16>,
}

impl Transport {
    /// Transport with all fields given
    pub fn new(protocol: Protocol, host: Option<String>, port: Option<u16>) -> Self {
        Self {
            protocol,
            host,
            port,
        }
    }
}

/// A structured endpoint descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Descriptor {
    /// Filter layers, outermost first
    pub filters: Vec<Filter>,
    /// Bottom transport
    pub transport: Transport,
}

impl Descriptor {
    /// Plain transport descriptor
    pub fn new(protocol: Protocol, host: Option<&str>, port: Option<u16>) -> Self {
        Self {
            filters: Vec::new(),
            transport: Transport::new(protocol, host.map(str::to_string), port),
        }
    }

    /// Push a filter on top of the current stack
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.insert(0, filter);
        self
    }

    /// Parse the wire form
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    /// Whether the port still has to be supplied
    pub fn is_port_pending(&self) -> bool {
        self.transport.port.is_none()
    }

    /// Copy of this descriptor with the port filled in
    pub fn with_port(&self, port: u16) -> Self {
        let mut d = self.clone();
        d.transport.port = Some(port);
        d
    }

    /// Port, or an error naming the descriptor if it is still pending
    pub fn port(&self) -> Result<u16> {
        self.transport
            .port
            .ok_or_else(|| StreamError::invalid_descriptor(self.to_string(), "port not set"))
    }

    /// Protocol at the bottom of the stack
    pub fn protocol(&self) -> Protocol {
        self.transport.protocol
    }

    /// Descriptor with the outermost filter removed
    pub fn inner(&self) -> Option<Self> {
        if self.filters.is_empty() {
            return None;
        }
        Some(Self {
            filters: self.filters[1..].to_vec(),
            transport: self.transport.clone(),
        })
    }

    /// Two descriptors describe the same protocol stack (addresses aside)
    pub fn stack_matches(&self, other: &Descriptor) -> bool {
        self.filters == other.filters && self.transport.protocol == other.transport.protocol
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for filter in &self.filters {
            write!(f, "{},", filter.as_str())?;
        }
        write!(f, "{},", self.transport.protocol)?;
        if let Some(host) = &self.transport.host {
            write!(f, "{},", host)?;
        }
        if let Some(port) = self.transport.port {
            write!(f, "{}", port)?;
        }
        Ok(())
    }
}

impl FromStr for Descriptor {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s.split(',').map(str::trim).collect();
        let mut filters = Vec::new();
        let mut idx = 0;

        while let Some(filter) = tokens.get(idx).and_then(|t| Filter::from_token(t)) {
            filters.push(filter);
            idx += 1;
        }

        let proto_token = tokens
            .get(idx)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| StreamError::invalid_descriptor(s, "missing protocol"))?;
        if proto_token.contains('(') {
            return Err(StreamError::invalid_descriptor(s, "protocol options are not supported"));
        }
        let protocol: Protocol = proto_token.parse()?;

        let rest = &tokens[idx + 1..];
        let (host, port_token) = match rest {
            [] => return Err(StreamError::invalid_descriptor(s, "missing port")),
            [port] => (None, *port),
            [host, port] => {
                if host.is_empty() {
                    return Err(StreamError::invalid_descriptor(s, "empty host"));
                }
                (Some(host.to_string()), *port)
            }
            _ => return Err(StreamError::invalid_descriptor(s, "too many fields")),
        };

        let port = if port_token.is_empty() {
            None
        } else {
            Some(port_token.parse::<u16>().map_err(|_| {
                StreamError::invalid_descriptor(s, format!("invalid port '{}'", port_token))
            })?)
        };

        Ok(Self {
            filters,
            transport: Transport::new(protocol, host, port),
        })
    }
}

impl TryFrom<String> for Descriptor {
    type Error = StreamError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Descriptor> for String {
    fn from(d: Descriptor) -> Self {
        d.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accept_form() {
        let d: Descriptor = "sctp,0".parse().unwrap();
        assert!(d.filters.is_empty());
        assert_eq!(d.protocol(), Protocol::Sctp);
        assert_eq!(d.transport.host, None);
        assert_eq!(d.transport.port, Some(0));
    }

    #[test]
    fn test_parse_pending_port() {
        let d: Descriptor = "tcp,localhost,".parse().unwrap();
        assert_eq!(d.transport.host.as_deref(), Some("localhost"));
        assert!(d.is_port_pending());
        assert_eq!(d.with_port(4001).to_string(), "tcp,localhost,4001");
    }

    #[test]
    fn test_parse_filter_stack() {
        let d: Descriptor = "telnet,sctp,localhost,".parse().unwrap();
        assert_eq!(d.filters, vec![Filter::Telnet]);
        assert_eq!(d.protocol(), Protocol::Sctp);
        assert_eq!(d.inner().unwrap().to_string(), "sctp,localhost,");
    }

    #[test]
    fn test_wire_form_is_stable() {
        for s in ["tcp,localhost,0", "sctp,0", "udp,localhost,", "telnet,sctp,0"] {
            let d: Descriptor = s.parse().unwrap();
            assert_eq!(d.to_string(), s);
        }
    }

    #[test]
    fn test_builder_matches_parser() {
        let built = Descriptor::new(Protocol::Sctp, Some("localhost"), None).with_filter(Filter::Telnet);
        assert_eq!(built, "telnet,sctp,localhost,".parse().unwrap());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "ssl,tcp,0".parse::<Descriptor>(),
            Err(StreamError::UnsupportedProtocol(_))
        ));
        assert!("tcp".parse::<Descriptor>().unwrap_err().is_descriptor_error());
        assert!("tcp,localhost,99999".parse::<Descriptor>().is_err());
        assert!("tcp,a,b,c".parse::<Descriptor>().is_err());
        assert!("telnet(rfc2217),tcp,0".parse::<Descriptor>().is_err());
    }

    #[test]
    fn test_stack_matches_ignores_addresses() {
        let a: Descriptor = "telnet,sctp,0".parse().unwrap();
        let b: Descriptor = "telnet,sctp,localhost,".parse().unwrap();
        let c: Descriptor = "sctp,localhost,".parse().unwrap();
        assert!(a.stack_matches(&b));
        assert!(!a.stack_matches(&c));
    }

    #[test]
    fn test_serde_uses_wire_form() {
        let d: Descriptor = "udp,localhost,0".parse().unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"udp,localhost,0\"");
        let back: Descriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
