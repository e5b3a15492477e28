//! Opening endpoints and acceptors from descriptors
//!
//! Descriptors are built inside out: the transport is opened first and
//! every filter, innermost first, is layered on top of it.

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::debug;

use streamio_core::{Descriptor, EndpointConfig, Filter, Protocol, Result, StreamError};

use crate::acceptor::Acceptor;
use crate::endpoint::Endpoint;
use crate::filter::{TelnetAcceptor, TelnetEndpoint};
use crate::transport::{SctpAcceptor, SctpEndpoint, TcpAcceptor, TcpEndpoint, UdpAcceptor, UdpEndpoint};

/// Open an acceptor for `descriptor`
pub fn open_acceptor<'a>(
    descriptor: &'a Descriptor,
    config: &'a EndpointConfig,
) -> BoxFuture<'a, Result<Acceptor>> {
    async move {
        let acceptor = match (descriptor.filters.first(), descriptor.inner()) {
            (Some(Filter::Telnet), Some(lower)) => {
                let inner = open_acceptor(&lower, config).await?;
                Acceptor::new(TelnetAcceptor::new(inner, descriptor, config))
            }
            _ => match descriptor.protocol() {
                Protocol::Tcp => Acceptor::new(TcpAcceptor::bind(descriptor, config).await?),
                Protocol::Udp => Acceptor::new(UdpAcceptor::bind(descriptor, config).await?),
                Protocol::Sctp => Acceptor::new(SctpAcceptor::bind(descriptor, config).await?),
            },
        };
        debug!(%descriptor, addrs = ?acceptor.local_addrs(), "acceptor open");
        Ok(acceptor)
    }
    .boxed()
}

/// Connect to `descriptor`
///
/// The port must be filled in; a pending port is a descriptor error.
pub fn connect<'a>(
    descriptor: &'a Descriptor,
    config: &'a EndpointConfig,
) -> BoxFuture<'a, Result<Endpoint>> {
    async move {
        if descriptor.is_port_pending() {
            return Err(StreamError::invalid_descriptor(
                descriptor.to_string(),
                "port not filled in",
            ));
        }
        let endpoint = match (descriptor.filters.first(), descriptor.inner()) {
            (Some(Filter::Telnet), Some(lower)) => {
                let inner = connect(&lower, config).await?;
                Endpoint::new(TelnetEndpoint::negotiate(inner, config).await?)
            }
            _ => match descriptor.protocol() {
                Protocol::Tcp => Endpoint::new(TcpEndpoint::connect(descriptor, config).await?),
                Protocol::Udp => Endpoint::new(UdpEndpoint::connect(descriptor, config).await?),
                Protocol::Sctp => Endpoint::new(SctpEndpoint::connect(descriptor, config).await?),
            },
        };
        debug!(%descriptor, endpoint = endpoint.name(), "connected");
        Ok(endpoint)
    }
    .boxed()
}
