//! Transport endpoints
//!
//! - [`tcp`] - TCP streams with urgent data
//! - [`udp`] - UDP with per-peer demultiplexing on the accept side
//! - [`sctp`] - one-to-one SCTP associations (Linux)

pub mod sctp;
pub mod tcp;
pub mod udp;

mod sys;

pub use sctp::{sctp_supported, SctpAcceptor, SctpEndpoint};
pub use tcp::{TcpAcceptor, TcpEndpoint};
pub use udp::{UdpAcceptor, UdpEndpoint};

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::lookup_host;

use streamio_core::{Result, StreamError, Transport};

/// Resolve the transport's address, IPv4 results first
///
/// A missing host resolves to the IPv4 wildcard, which is what accepters
/// written as `proto,port` expect.
pub(crate) async fn resolve(transport: &Transport) -> Result<Vec<SocketAddr>> {
    let port = transport.port.unwrap_or(0);

    let Some(host) = transport.host.as_deref() else {
        return Ok(vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)]);
    };

    let mut addrs: Vec<SocketAddr> = Vec::new();
    for addr in lookup_host((host, port))
        .await
        .map_err(|e| StreamError::Resolve(format!("{}: {}", host, e)))?
    {
        if !addrs.contains(&addr) {
            addrs.push(addr);
        }
    }
    addrs.sort_by_key(|a| !a.is_ipv4());

    if addrs.is_empty() {
        return Err(StreamError::Resolve(host.to_string()));
    }
    Ok(addrs)
}

/// Human-readable name for a connection, `proto,local->remote`
pub(crate) fn connection_name(proto: &str, local: Option<SocketAddr>, remote: SocketAddr) -> String {
    match local {
        Some(local) => format!("{},{}->{}", proto, local, remote),
        None => format!("{},{}", proto, remote),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamio_core::Protocol;

    #[tokio::test]
    async fn test_resolve_wildcard() {
        let t = Transport::new(Protocol::Sctp, None, Some(0));
        let addrs = resolve(&t).await.unwrap();
        assert_eq!(addrs, vec!["0.0.0.0:0".parse().unwrap()]);
    }

    #[tokio::test]
    async fn test_resolve_prefers_ipv4() {
        let t = Transport::new(Protocol::Tcp, Some("localhost".to_string()), Some(80));
        let addrs = resolve(&t).await.unwrap();
        assert!(addrs[0].is_ipv4());
        assert_eq!(addrs[0].port(), 80);
    }

    #[test]
    fn test_connection_name() {
        let remote: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert_eq!(connection_name("tcp", None, remote), "tcp,127.0.0.1:9");
    }
}
