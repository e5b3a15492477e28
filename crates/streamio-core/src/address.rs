//! Address strings reported through the control interface
//!
//! Addresses are rendered as `family,address,port`, e.g.
//! `ipv4,127.0.0.1,4001` or `ipv6,::1,4001`. A multi-homed endpoint reports
//! each address, separated by `;`.

use std::net::{IpAddr, SocketAddr};

use crate::error::{Result, StreamError};

/// Render a single socket address
pub fn format_addr(addr: &SocketAddr) -> String {
    match addr.ip() {
        IpAddr::V4(ip) => format!("ipv4,{},{}", ip, addr.port()),
        IpAddr::V6(ip) => format!("ipv6,{},{}", ip, addr.port()),
    }
}

/// Render a list of socket addresses
pub fn format_addrs(addrs: &[SocketAddr]) -> String {
    addrs.iter().map(format_addr).collect::<Vec<_>>().join(";")
}

/// Parse an address string back into socket addresses
pub fn parse_addrs(s: &str) -> Result<Vec<SocketAddr>> {
    s.split(';').map(parse_one).collect()
}

fn parse_one(s: &str) -> Result<SocketAddr> {
    let bad = |reason: &str| StreamError::invalid_descriptor(s, reason);

    let (family, rest) = s.split_once(',').ok_or_else(|| bad("missing family"))?;
    let (ip, port) = rest.rsplit_once(',').ok_or_else(|| bad("missing port"))?;
    let ip: IpAddr = ip.parse().map_err(|_| bad("invalid address"))?;
    let port: u16 = port.parse().map_err(|_| bad("invalid port"))?;

    match (family, ip) {
        ("ipv4", IpAddr::V4(_)) | ("ipv6", IpAddr::V6(_)) => Ok(SocketAddr::new(ip, port)),
        _ => Err(bad("family does not match address")),
    }
}

/// Prefix-plus-port form used by test expectations such as `ipv4,127.0.0.1,`
pub fn with_port(prefix: &str, port: u16) -> String {
    format!("{}{}", prefix, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ipv4() {
        let addr: SocketAddr = "127.0.0.1:4001".parse().unwrap();
        assert_eq!(format_addr(&addr), "ipv4,127.0.0.1,4001");
    }

    #[test]
    fn test_format_multi_homed() {
        let addrs: Vec<SocketAddr> = vec!["127.0.0.1:9".parse().unwrap(), "[::1]:9".parse().unwrap()];
        assert_eq!(format_addrs(&addrs), "ipv4,127.0.0.1,9;ipv6,::1,9");
        assert_eq!(parse_addrs("ipv4,127.0.0.1,9;ipv6,::1,9").unwrap(), addrs);
    }

    #[test]
    fn test_parse_rejects_family_mismatch() {
        assert!(parse_addrs("ipv6,127.0.0.1,9").is_err());
        assert!(parse_addrs("ipv4,127.0.0.1").is_err());
    }

    #[test]
    fn test_with_port() {
        assert_eq!(with_port("ipv4,127.0.0.1,", 5000), "ipv4,127.0.0.1,5000");
    }
}
