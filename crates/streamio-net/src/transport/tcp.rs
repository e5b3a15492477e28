//! TCP endpoints
//!
//! Plain tokio streams, plus urgent data through `MSG_OOB`. Only one byte
//! of urgent data is delivered per send: TCP marks the last byte of the
//! segment as urgent and the rest travels in the normal stream.

use async_trait::async_trait;
use socket2::SockRef;
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use streamio_core::control::parse_bool;
use streamio_core::{
    format_addr, ControlOption, ControlRequest, Descriptor, EndpointConfig, Protocol, Result,
    StreamError,
};

use super::{connection_name, resolve};
use crate::acceptor::StreamAcceptor;
use crate::endpoint::{Endpoint, StreamEndpoint};

/// How often a pending urgent read re-checks the socket
const URGENT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A connected TCP stream
pub struct TcpEndpoint {
    stream: TcpStream,
    name: String,
    max_write: usize,
}

impl TcpEndpoint {
    fn from_stream(stream: TcpStream, config: &EndpointConfig) -> Result<Self> {
        let remote = stream.peer_addr()?;
        let local = stream.local_addr().ok();
        Ok(Self {
            stream,
            name: connection_name("tcp", local, remote),
            max_write: config.read_buffer_size,
        })
    }

    /// Connect to the descriptor's address, trying each resolved address in turn
    pub async fn connect(descriptor: &Descriptor, config: &EndpointConfig) -> Result<Self> {
        let port = descriptor.port()?;
        let addrs = resolve(&descriptor.transport).await?;
        let mut last_err = None;

        for addr in addrs {
            match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!(%addr, "tcp connected");
                    return Self::from_stream(stream, config);
                }
                Ok(Err(e)) => {
                    debug!(%addr, error = %e, "tcp connect attempt failed");
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

    fn try_recv_urgent(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let sock = SockRef::from(&self.stream);
        let mut tmp = vec![MaybeUninit::<u8>::uninit(); buf.len()];
        let n = sock.recv_out_of_band(&mut tmp)?;
        for (dst, src) in buf.iter_mut().zip(&tmp[..n]) {
            // SAFETY: recv initialised the first `n` bytes
            *dst = unsafe { src.assume_init() };
        }
        Ok(n)
    }
}

#[async_trait]
impl StreamEndpoint for TcpEndpoint {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.stream.read(buf).await? {
            0 if !buf.is_empty() => Err(StreamError::RemoteClosed),
            n => Ok(n),
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let len = data.len().min(self.max_write);
        Ok(self.stream.write(&data[..len]).await?)
    }

    async fn write_urgent(&mut self, data: &[u8]) -> Result<()> {
        let mut pos = 0;
        while pos < data.len() {
            self.stream.writable().await?;
            let stream = &self.stream;
            match stream.try_io(Interest::WRITABLE, || {
                SockRef::from(stream).send_out_of_band(&data[pos..])
            }) {
                Ok(n) => pos += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn read_urgent(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.try_recv_urgent(buf) {
                Ok(n) => return Ok(n),
                // EINVAL: no urgent data pending yet; EWOULDBLOCK: mark seen, byte not arrived
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.raw_os_error() == Some(libc::EINVAL) =>
                {
                    sleep(URGENT_POLL_INTERVAL).await
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn control(&mut self, req: &ControlRequest) -> Result<String> {
        if !req.depth.targets_here() {
            return Err(req.option.unsupported());
        }
        match (req.option, req.get) {
            (ControlOption::LocalAddr, true) => Ok(format_addr(&self.stream.local_addr()?)),
            (ControlOption::RemoteAddr, true) => Ok(format_addr(&self.stream.peer_addr()?)),
            (ControlOption::MaxWritePacket, true) => Ok(self.max_write.to_string()),
            (ControlOption::NoDelay, true) => {
                Ok(if self.stream.nodelay()? { "1" } else { "0" }.to_string())
            }
            (ControlOption::NoDelay, false) => {
                let on = parse_bool(req.option, req.require_value()?)?;
                self.stream.set_nodelay(on)?;
                Ok(String::new())
            }
            _ => Err(req.option.unsupported()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Err(e) = self.stream.shutdown().await {
            // the peer may already be gone
            debug!(endpoint = %self.name, error = %e, "tcp shutdown");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A listening TCP socket
pub struct TcpAcceptor {
    listener: Option<TcpListener>,
    descriptor: Descriptor,
    config: EndpointConfig,
}

impl TcpAcceptor {
    /// Bind to the descriptor's address
    pub async fn bind(descriptor: &Descriptor, config: &EndpointConfig) -> Result<Self> {
        let addr = resolve(&descriptor.transport)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StreamError::Resolve(descriptor.to_string()))?;

        let listen_failed = |e: std::io::Error| StreamError::ListenFailed {
            address: addr.to_string(),
            reason: e.to_string(),
        };
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(listen_failed)?;
        socket.set_reuseaddr(true).map_err(listen_failed)?;
        socket.bind(addr).map_err(listen_failed)?;
        let listener = socket.listen(128).map_err(listen_failed)?;

        debug!(local = %listener.local_addr()?, "tcp listening");
        Ok(Self {
            listener: Some(listener),
            descriptor: descriptor.clone(),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl StreamAcceptor for TcpAcceptor {
    async fn accept(&mut self) -> Result<Endpoint> {
        let listener = self.listener.as_ref().ok_or(StreamError::Closed)?;
        let (stream, remote) = listener.accept().await?;
        debug!(%remote, "tcp accepted");
        Ok(Endpoint::new(TcpEndpoint::from_stream(stream, &self.config)?))
    }

    async fn connect_from(&mut self, target: &Descriptor) -> Result<Endpoint> {
        if target.protocol() != Protocol::Tcp {
            return Err(StreamError::invalid_descriptor(target.to_string(), "not a tcp descriptor"));
        }
        Ok(Endpoint::new(TcpEndpoint::connect(target, &self.config).await?))
    }

    fn local_addrs(&self) -> Vec<SocketAddr> {
        let Some(listener) = &self.listener else {
            return Vec::new();
        };
        match listener.local_addr() {
            Ok(addr) => vec![addr],
            Err(e) => {
                warn!(error = %e, "tcp listener has no local address");
                Vec::new()
            }
        }
    }

    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.listener = None;
        Ok(())
    }
}
