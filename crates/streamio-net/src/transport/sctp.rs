//! SCTP endpoints
//!
//! One-to-one style SCTP sockets (`SOCK_STREAM`, `IPPROTO_SCTP`) driven
//! through tokio's [`AsyncFd`]. Stream counts are requested with
//! `SCTP_INITMSG` before the association is set up and read back with
//! `SCTP_STATUS`. Acceptors report every address they are bound to
//! (`SCTP_GET_LOCAL_ADDRS`), so a multi-homed or wildcard listener yields a
//! `;`-joined address list.
//!
//! Kernels without SCTP support fail socket creation; that surfaces as
//! [`StreamError::ProtocolUnavailable`] and can be probed up front with
//! [`sctp_supported`].

use async_trait::async_trait;
use socket2::{Domain, Protocol as SockProtocol, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::os::fd::AsRawFd;
use tokio::io::unix::AsyncFd;
use tokio::time::timeout;
use tracing::{debug, warn};

use streamio_core::{
    format_addr, ControlOption, ControlRequest, Descriptor, EndpointConfig, Protocol, Result,
    SctpConfig, StreamError,
};

use super::{connection_name, resolve, sys};
use crate::acceptor::StreamAcceptor;
use crate::endpoint::{Endpoint, StreamEndpoint};

/// Check whether the kernel can create SCTP sockets
pub fn sctp_supported() -> bool {
    Socket::new(Domain::IPV4, Type::STREAM, Some(SockProtocol::from(libc::IPPROTO_SCTP))).is_ok()
}

fn new_socket(addr: &SocketAddr, config: &SctpConfig) -> Result<Socket> {
    let socket = Socket::new(
        Domain::for_address(*addr),
        Type::STREAM,
        Some(SockProtocol::from(libc::IPPROTO_SCTP)),
    )
    .map_err(|e| match e.raw_os_error() {
        Some(libc::EPROTONOSUPPORT) | Some(libc::ESOCKTNOSUPPORT) | Some(libc::EAFNOSUPPORT) => {
            StreamError::ProtocolUnavailable("sctp".to_string())
        }
        _ => StreamError::Io(e),
    })?;
    socket.set_nonblocking(true)?;
    sys::set_initmsg(socket.as_raw_fd(), config)?;
    Ok(socket)
}

fn sock_addr(addr: &SockAddr) -> io::Result<SocketAddr> {
    addr.as_socket()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "not an inet address"))
}

/// An established SCTP association
pub struct SctpEndpoint {
    fd: AsyncFd<Socket>,
    name: String,
    max_write: usize,
}

impl SctpEndpoint {
    fn from_socket(socket: Socket, config: &EndpointConfig) -> Result<Self> {
        let remote = sock_addr(&socket.peer_addr()?)?;
        let local = socket.local_addr().ok().and_then(|a| a.as_socket());
        Ok(Self {
            fd: AsyncFd::new(socket)?,
            name: connection_name("sctp", local, remote),
            max_write: config.read_buffer_size,
        })
    }

    /// Connect to the descriptor's address
    pub async fn connect(descriptor: &Descriptor, config: &EndpointConfig) -> Result<Self> {
        let port = descriptor.port()?;
        let mut last_err = None;

        for addr in resolve(&descriptor.transport).await? {
            match timeout(config.connect_timeout, Self::connect_one(addr, config)).await {
                Ok(Ok(ep)) => {
                    debug!(%addr, "sctp connected");
                    return Ok(ep);
                }
                Ok(Err(e @ StreamError::ProtocolUnavailable(_))) => return Err(e),
                Ok(Err(e)) => {
                    debug!(%addr, error = %e, "sctp connect attempt failed");
                    last_err = Some(e.to_string());
                }
                Err(_) => {
                    return Err(StreamError::Timeout {
                        duration_ms: config.connect_timeout.as_millis() as u64,
                    })
                }
            }
        }

        Err(StreamError::ConnectFailed {
            address: format!("{}:{}", descriptor.transport.host.as_deref().unwrap_or("*"), port),
            reason: last_err.unwrap_or_else(|| "no addresses".to_string()),
        })
    }

    async fn connect_one(addr: SocketAddr, config: &EndpointConfig) -> Result<Self> {
        let socket = new_socket(&addr, &config.sctp)?;
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => return Err(e.into()),
        }

        let fd = AsyncFd::new(socket)?;
        let mut guard = fd.writable().await?;
        guard.clear_ready();
        drop(guard);
        if let Some(e) = fd.get_ref().take_error()? {
            return Err(e.into());
        }

        Self::from_socket(fd.into_inner(), config)
    }
}

#[async_trait]
impl StreamEndpoint for SctpEndpoint {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| {
                let mut sock: &Socket = inner.get_ref();
                sock.read(buf)
            }) {
                Ok(Ok(0)) if !buf.is_empty() => return Err(StreamError::RemoteClosed),
                Ok(res) => return Ok(res?),
                Err(_would_block) => continue,
            }
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let len = data.len().min(self.max_write);
        loop {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| {
                let mut sock: &Socket = inner.get_ref();
                sock.write(&data[..len])
            }) {
                Ok(res) => return Ok(res?),
                Err(_would_block) => continue,
            }
        }
    }

    async fn control(&mut self, req: &ControlRequest) -> Result<String> {
        if !req.depth.targets_here() || !req.get {
            return Err(req.option.unsupported());
        }
        let sock = self.fd.get_ref();
        match req.option {
            ControlOption::Streams => Ok(sys::stream_counts(sock.as_raw_fd())?.to_string()),
            ControlOption::LocalAddr => Ok(format_addr(&sock_addr(&sock.local_addr()?)?)),
            ControlOption::RemoteAddr => Ok(format_addr(&sock_addr(&sock.peer_addr()?)?)),
            ControlOption::MaxWritePacket => Ok(self.max_write.to_string()),
            _ => Err(req.option.unsupported()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Err(e) = self.fd.get_ref().shutdown(Shutdown::Both) {
            debug!(endpoint = %self.name, error = %e, "sctp shutdown");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A listening SCTP socket
pub struct SctpAcceptor {
    fd: Option<AsyncFd<Socket>>,
    descriptor: Descriptor,
    config: EndpointConfig,
}

impl SctpAcceptor {
    /// Bind and listen on the descriptor's address
    pub async fn bind(descriptor: &Descriptor, config: &EndpointConfig) -> Result<Self> {
        let addr = resolve(&descriptor.transport)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StreamError::Resolve(descriptor.to_string()))?;

        let socket = new_socket(&addr, &config.sctp)?;
        let listen_failed = |e: io::Error| StreamError::ListenFailed {
            address: addr.to_string(),
            reason: e.to_string(),
        };
        socket.set_reuse_address(true).map_err(listen_failed)?;
        socket.bind(&addr.into()).map_err(listen_failed)?;
        socket.listen(128).map_err(listen_failed)?;

        let fd = AsyncFd::new(socket)?;
        debug!(local = ?fd.get_ref().local_addr().ok().and_then(|a| a.as_socket()), "sctp listening");
        Ok(Self {
            fd: Some(fd),
            descriptor: descriptor.clone(),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl StreamAcceptor for SctpAcceptor {
    async fn accept(&mut self) -> Result<Endpoint> {
        let fd = self.fd.as_ref().ok_or(StreamError::Closed)?;
        loop {
            let mut guard = fd.readable().await?;
            match guard.try_io(|inner| inner.get_ref().accept()) {
                Ok(Ok((socket, remote))) => {
                    debug!(remote = ?remote.as_socket(), "sctp accepted");
                    socket.set_nonblocking(true)?;
                    return Ok(Endpoint::new(SctpEndpoint::from_socket(socket, &self.config)?));
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_would_block) => continue,
            }
        }
    }

    async fn connect_from(&mut self, target: &Descriptor) -> Result<Endpoint> {
        if target.protocol() != Protocol::Sctp {
            return Err(StreamError::invalid_descriptor(target.to_string(), "not an sctp descriptor"));
        }
        Ok(Endpoint::new(SctpEndpoint::connect(target, &self.config).await?))
    }

    fn local_addrs(&self) -> Vec<SocketAddr> {
        let Some(fd) = &self.fd else {
            return Vec::new();
        };
        match sys::local_addrs(fd.as_raw_fd()) {
            Ok(addrs) if !addrs.is_empty() => return addrs,
            Ok(_) => {}
            Err(e) => debug!(error = %e, "sctp local address list unavailable"),
        }
        match fd.get_ref().local_addr().map(|a| a.as_socket()) {
            Ok(Some(addr)) => vec![addr],
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "sctp listener has no local address");
                Vec::new()
            }
        }
    }

    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.fd = None;
        Ok(())
    }
}
