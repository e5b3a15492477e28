//! UDP endpoints
//!
//! The connecting side uses a connected socket of its own. The accepting
//! side shares one bound socket between all peers: a background task reads
//! every datagram, looks the sender up in a peer table and forwards the
//! payload to that peer's endpoint. The first datagram from an unknown
//! address creates a new endpoint and hands it to [`UdpAcceptor::accept`].
//!
//! Closing the acceptor stops new peers from being admitted. Datagrams keep
//! flowing to peers that were already accepted, and the background task
//! exits once the last of them closes.
//!
//! Each write is sent as one datagram, so writes are capped at
//! [`UDP_MAX_PAYLOAD`] bytes. A read that is shorter than the datagram
//! keeps the remainder for the next read.

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use streamio_core::{
    format_addr, ControlOption, ControlRequest, Descriptor, EndpointConfig, Protocol, Result,
    StreamError, UDP_MAX_PAYLOAD,
};

use super::{connection_name, resolve};
use crate::acceptor::StreamAcceptor;
use crate::endpoint::{Endpoint, StreamEndpoint};

/// Datagrams queued per peer before the demultiplexer waits
const PEER_QUEUE_DEPTH: usize = 64;

/// New peers queued before the demultiplexer waits for `accept`
const ACCEPT_QUEUE_DEPTH: usize = 16;

/// Senders for every live peer of a shared socket
#[derive(Default)]
struct PeerTable {
    peers: Mutex<HashMap<SocketAddr, mpsc::Sender<Bytes>>>,
    /// Signalled when the table becomes empty or the acceptor closes
    changed: Notify,
}

impl PeerTable {
    fn get(&self, peer: &SocketAddr) -> Option<mpsc::Sender<Bytes>> {
        self.peers.lock().get(peer).cloned()
    }

    fn insert(&self, peer: SocketAddr, tx: mpsc::Sender<Bytes>) {
        self.peers.lock().insert(peer, tx);
    }

    fn remove(&self, peer: &SocketAddr) {
        let empty = {
            let mut peers = self.peers.lock();
            peers.remove(peer);
            peers.is_empty()
        };
        if empty {
            self.changed.notify_one();
        }
    }

    fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    fn len(&self) -> usize {
        self.peers.lock().len()
    }
}

enum Link {
    Connected(UdpSocket),
    Shared {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
        rx: mpsc::Receiver<Bytes>,
        peers: Arc<PeerTable>,
    },
}

/// One UDP peer relationship
pub struct UdpEndpoint {
    link: Link,
    pending: Bytes,
    name: String,
    released: bool,
}

impl UdpEndpoint {
    /// Open a connected socket to the descriptor's address
    pub async fn connect(descriptor: &Descriptor, config: &EndpointConfig) -> Result<Self> {
        let port = descriptor.port()?;
        let mut last_err = None;

        for addr in resolve(&descriptor.transport).await? {
            let bind_addr = match addr {
                SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
                SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
            };
            let attempt = async {
                let socket = UdpSocket::bind(bind_addr).await?;
                socket.connect(addr).await?;
                Ok::<_, std::io::Error>(socket)
            };
            match timeout(config.connect_timeout, attempt).await {
                Ok(Ok(socket)) => {
                    debug!(%addr, "udp connected");
                    let name = connection_name("udp", socket.local_addr().ok(), addr);
                    return Ok(Self {
                        link: Link::Connected(socket),
                        pending: Bytes::new(),
                        name,
                        released: false,
                    });
                }
                Ok(Err(e)) => {
                    debug!(%addr, error = %e, "udp connect attempt failed");
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

    fn shared(socket: Arc<UdpSocket>, peer: SocketAddr, peers: &Arc<PeerTable>) -> (Self, mpsc::Sender<Bytes>) {
        let (tx, rx) = mpsc::channel(PEER_QUEUE_DEPTH);
        let name = connection_name("udp", socket.local_addr().ok(), peer);
        let ep = Self {
            link: Link::Shared {
                socket,
                peer,
                rx,
                peers: peers.clone(),
            },
            pending: Bytes::new(),
            name,
            released: false,
        };
        (ep, tx)
    }

    async fn next_datagram(&mut self) -> Result<Bytes> {
        match &mut self.link {
            Link::Connected(socket) => {
                let mut buf = vec![0u8; UDP_MAX_PAYLOAD];
                let n = socket.recv(&mut buf).await?;
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Link::Shared { rx, .. } => rx.recv().await.ok_or(StreamError::RemoteClosed),
        }
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match &self.link {
            Link::Connected(socket) => socket.local_addr(),
            Link::Shared { socket, .. } => socket.local_addr(),
        }
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Link::Shared { peer, peers, rx, .. } = &mut self.link {
            rx.close();
            peers.remove(peer);
        }
    }

    fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        match &self.link {
            Link::Connected(socket) => socket.peer_addr(),
            Link::Shared { peer, .. } => Ok(*peer),
        }
    }
}

#[async_trait]
impl StreamEndpoint for UdpEndpoint {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        while self.pending.is_empty() {
            self.pending = self.next_datagram().await?;
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let len = data.len().min(UDP_MAX_PAYLOAD);
        let sent = match &self.link {
            Link::Connected(socket) => socket.send(&data[..len]).await?,
            Link::Shared { socket, peer, .. } => socket.send_to(&data[..len], *peer).await?,
        };
        Ok(sent)
    }

    async fn control(&mut self, req: &ControlRequest) -> Result<String> {
        if !req.depth.targets_here() || !req.get {
            return Err(req.option.unsupported());
        }
        match req.option {
            ControlOption::LocalAddr => Ok(format_addr(&self.local_addr()?)),
            ControlOption::RemoteAddr => Ok(format_addr(&self.peer_addr()?)),
            ControlOption::MaxWritePacket => Ok(UDP_MAX_PAYLOAD.to_string()),
            _ => Err(req.option.unsupported()),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for UdpEndpoint {
    fn drop(&mut self) {
        self.release();
    }
}

/// A bound UDP socket demultiplexing datagrams per sender
pub struct UdpAcceptor {
    socket: Option<Arc<UdpSocket>>,
    peers: Arc<PeerTable>,
    incoming: mpsc::Receiver<UdpEndpoint>,
    demux: JoinHandle<()>,
    descriptor: Descriptor,
}

impl UdpAcceptor {
    /// Bind to the descriptor's address and start demultiplexing
    pub async fn bind(descriptor: &Descriptor, _config: &EndpointConfig) -> Result<Self> {
        let addr = resolve(&descriptor.transport)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StreamError::Resolve(descriptor.to_string()))?;

        let socket = UdpSocket::bind(addr).await.map_err(|e| StreamError::ListenFailed {
            address: addr.to_string(),
            reason: e.to_string(),
        })?;
        let socket = Arc::new(socket);
        debug!(local = %socket.local_addr()?, "udp listening");

        let peers = Arc::new(PeerTable::default());
        let (accept_tx, incoming) = mpsc::channel(ACCEPT_QUEUE_DEPTH);
        let demux = tokio::spawn(demultiplex(socket.clone(), peers.clone(), accept_tx));

        Ok(Self {
            socket: Some(socket),
            peers,
            incoming,
            demux,
            descriptor: descriptor.clone(),
        })
    }
}

async fn demultiplex(socket: Arc<UdpSocket>, peers: Arc<PeerTable>, accept_tx: mpsc::Sender<UdpEndpoint>) {
    let mut buf = vec![0u8; UDP_MAX_PAYLOAD];
    loop {
        let received = tokio::select! {
            r = socket.recv_from(&mut buf) => r,
            _ = peers.changed.notified() => {
                if accept_tx.is_closed() && peers.is_empty() {
                    debug!("udp acceptor closed and no peers left, stopping demultiplexer");
                    return;
                }
                continue;
            }
        };
        let (n, from) = match received {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "udp receive failed");
                continue;
            }
        };
        let datagram = Bytes::copy_from_slice(&buf[..n]);

        let tx = match peers.get(&from) {
            Some(tx) => tx,
            None if accept_tx.is_closed() => {
                trace!(peer = %from, "acceptor closed, dropping datagram from new peer");
                continue;
            }
            None => {
                let (ep, tx) = UdpEndpoint::shared(socket.clone(), from, &peers);
                peers.insert(from, tx.clone());
                trace!(peer = %from, "new udp peer");
                if accept_tx.send(ep).await.is_err() {
                    // the endpoint was dropped with the send and released its entry
                    continue;
                }
                tx
            }
        };

        if tx.send(datagram).await.is_err() {
            // endpoint closed; later datagrams from this address start a new peer
            peers.remove(&from);
        }
    }
}

#[async_trait]
impl StreamAcceptor for UdpAcceptor {
    async fn accept(&mut self) -> Result<Endpoint> {
        if self.socket.is_none() {
            return Err(StreamError::Closed);
        }
        let ep = self.incoming.recv().await.ok_or(StreamError::Closed)?;
        Ok(Endpoint::new(ep))
    }

    async fn connect_from(&mut self, target: &Descriptor) -> Result<Endpoint> {
        if target.protocol() != Protocol::Udp {
            return Err(StreamError::invalid_descriptor(target.to_string(), "not a udp descriptor"));
        }
        let socket = self.socket.clone().ok_or(StreamError::Closed)?;
        let peer = resolve(&target.transport)
            .await?
            .into_iter()
            .find(|a| a.is_ipv4() == socket.local_addr().map(|l| l.is_ipv4()).unwrap_or(true))
            .ok_or_else(|| StreamError::Resolve(target.to_string()))?;

        let (ep, tx) = UdpEndpoint::shared(socket, peer, &self.peers);
        self.peers.insert(peer, tx);
        debug!(%peer, "udp peer registered");
        Ok(Endpoint::new(ep))
    }

    fn local_addrs(&self) -> Vec<SocketAddr> {
        self.socket
            .as_ref()
            .and_then(|s| s.local_addr().ok())
            .into_iter()
            .collect()
    }

    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.socket = None;
        self.incoming.close();
        // drop peers that were admitted but never accepted
        while self.incoming.try_recv().is_ok() {}
        debug!(peers = self.peers.len(), "udp acceptor closed");
        self.peers.changed.notify_one();
        Ok(())
    }
}

impl Drop for UdpAcceptor {
    fn drop(&mut self) {
        if self.peers.is_empty() {
            self.demux.abort();
        } else {
            self.peers.changed.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_connected_read_keeps_remainder() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let desc = Descriptor::new(Protocol::Udp, Some("127.0.0.1"), Some(port));
        let mut ep = UdpEndpoint::connect(&desc, &EndpointConfig::default()).await.unwrap();

        ep.write(b"x").await.unwrap();
        let (_, client) = server.recv_from(&mut [0u8; 8]).await.unwrap();
        server.send_to(b"hello", client).await.unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(ep.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(ep.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");
    }

    #[tokio::test]
    async fn test_write_capped_to_one_datagram() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let desc = Descriptor::new(
            Protocol::Udp,
            Some("127.0.0.1"),
            Some(server.local_addr().unwrap().port()),
        );
        let mut ep = UdpEndpoint::connect(&desc, &EndpointConfig::default()).await.unwrap();
        let big = vec![7u8; UDP_MAX_PAYLOAD + 100];
        assert_eq!(ep.write(&big).await.unwrap(), UDP_MAX_PAYLOAD);

        let max = ep
            .control(&ControlRequest::get(0, ControlOption::MaxWritePacket))
            .await
            .unwrap();
        assert_eq!(max, UDP_MAX_PAYLOAD.to_string());
    }

    #[tokio::test]
    async fn test_demultiplexer_stops_after_last_peer() {
        let config = EndpointConfig::default();
        let desc = Descriptor::new(Protocol::Udp, Some("127.0.0.1"), Some(0));
        let mut acceptor = UdpAcceptor::bind(&desc, &config).await.unwrap();
        let port = acceptor.local_addrs()[0].port();
        let target = Descriptor::new(Protocol::Udp, Some("127.0.0.1"), Some(port));

        let mut client = UdpEndpoint::connect(&target, &config).await.unwrap();
        client.write(b"A").await.unwrap();
        let mut server = acceptor.accept().await.unwrap();
        acceptor.shutdown().await.unwrap();

        client.write(b"B").await.unwrap();
        let mut buf = [0u8; 2];
        timeout(Duration::from_secs(5), server.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"AB");
        assert!(!acceptor.demux.is_finished());

        server.close().await.unwrap();
        timeout(Duration::from_secs(5), async {
            while !acceptor.demux.is_finished() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_endpoint_leaves_peer_table() {
        let peers = Arc::new(PeerTable::default());
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let (ep, tx) = UdpEndpoint::shared(socket, peer, &peers);
        peers.insert(peer, tx);
        assert_eq!(peers.len(), 1);
        drop(ep);
        assert!(peers.is_empty());
    }
}
