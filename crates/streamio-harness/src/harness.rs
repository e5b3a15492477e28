//! Acceptor harnesses
//!
//! [`TestAccept`] opens an acceptor, connects to it, runs an exchange over
//! the resulting pair and closes everything. [`TestAcceptConnect`] does
//! the same but originates the connection from a second acceptor, which
//! exercises a filter stack from both ends.
//!
//! Every wait is bounded, and every handle the harness opened is closed
//! before an error is returned.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use streamio_core::{ControlDepth, ControlOption, Descriptor, StreamError};
use streamio_net::{Acceptor, Endpoint};

use crate::assert::{assert_addr, expect_bytes_eq};
use crate::context::LibraryContext;
use crate::error::{HarnessError, Result};
use crate::exchange::{Exchange, ExchangeParams};

/// Where a harness run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessState {
    /// Nothing opened yet
    Init,
    /// Acceptor is listening
    Listening,
    /// Both ends are connected
    Connected,
    /// Exchange routine running
    Exchanging,
    /// Exchange done; the pair is open for control assertions
    Asserting,
    /// All handles closed
    Closed,
}

impl fmt::Display for HarnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HarnessState::Init => "init",
            HarnessState::Listening => "listening",
            HarnessState::Connected => "connected",
            HarnessState::Exchanging => "exchanging",
            HarnessState::Asserting => "asserting",
            HarnessState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct Progress {
    label: String,
    state: HarnessState,
}

impl Progress {
    fn new(label: String) -> Self {
        info!(test = %label, "harness start");
        Self {
            label,
            state: HarnessState::Init,
        }
    }

    fn advance(&mut self, next: HarnessState) {
        debug!(test = %self.label, from = %self.state, to = %next, "harness state");
        self.state = next;
    }
}

/// Handles opened so far; closed as a unit on failure
#[derive(Default)]
struct Staging {
    acceptor: Option<Acceptor>,
    connector: Option<Acceptor>,
    io1: Option<Endpoint>,
    io2: Option<Endpoint>,
}

impl Staging {
    async fn close_all(&mut self) {
        for ep in [self.io1.as_mut(), self.io2.as_mut()].into_iter().flatten() {
            if let Err(e) = ep.close().await {
                warn!(endpoint = ep.name(), error = %e, "close during cleanup failed");
            }
        }
        for acc in [self.acceptor.as_mut(), self.connector.as_mut()].into_iter().flatten() {
            if let Err(e) = acc.close().await {
                warn!(acceptor = %acc.descriptor(), error = %e, "close during cleanup failed");
            }
        }
    }

    fn into_pair(self, port: u16, progress: Progress) -> std::result::Result<AcceptPair, Self> {
        match self {
            Staging {
                acceptor: Some(acceptor),
                connector,
                io1: Some(io1),
                io2: Some(io2),
            } => Ok(AcceptPair {
                io1,
                io2,
                acceptor,
                connector,
                port,
                progress,
            }),
            incomplete => Err(incomplete),
        }
    }
}

/// A connected pair handed back by a harness
///
/// `io1` is the connecting side, `io2` the accepted side. When the
/// harness ran with `do_close(false)` the caller owns the cleanup and
/// must call [`AcceptPair::close`]; closing more than once is harmless.
pub struct AcceptPair {
    /// Connecting side
    pub io1: Endpoint,
    /// Accepted side
    pub io2: Endpoint,
    /// Listening acceptor
    pub acceptor: Acceptor,
    /// Acceptor that originated `io1`, for accept-connect runs
    pub connector: Option<Acceptor>,
    port: u16,
    progress: Progress,
}

impl AcceptPair {
    /// Port the acceptor listened on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current harness state
    pub fn state(&self) -> HarnessState {
        self.progress.state
    }

    /// Close both ends and the acceptors
    pub async fn close(&mut self) -> Result<()> {
        if self.progress.state == HarnessState::Closed {
            return Ok(());
        }
        let mut results = vec![
            self.io1.close().await,
            self.io2.close().await,
            self.acceptor.close().await,
        ];
        if let Some(connector) = self.connector.as_mut() {
            results.push(connector.close().await);
        }
        self.progress.advance(HarnessState::Closed);
        info!(test = %self.progress.label, "harness closed");
        results.into_iter().collect::<streamio_core::Result<Vec<()>>>()?;
        Ok(())
    }
}

impl fmt::Debug for AcceptPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptPair")
            .field("io1", &self.io1)
            .field("io2", &self.io2)
            .field("port", &self.port)
            .field("state", &self.progress.state)
            .finish()
    }
}

impl Drop for AcceptPair {
    fn drop(&mut self) {
        if self.progress.state != HarnessState::Closed {
            warn!(test = %self.progress.label, "accept pair dropped without close");
        }
    }
}

fn fill_port(d: &Descriptor, port: u16) -> Descriptor {
    if d.is_port_pending() {
        d.with_port(port)
    } else {
        d.clone()
    }
}

async fn bounded<T>(stage: &'static str, wait: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    timeout(wait, fut).await.map_err(|_| HarnessError::Timeout {
        stage,
        duration_ms: wait.as_millis() as u64,
    })?
}

async fn conclude(
    outcome: Result<u16>,
    mut staging: Staging,
    mut progress: Progress,
    do_close: bool,
) -> Result<AcceptPair> {
    let port = match outcome {
        Ok(port) => port,
        Err(e) => {
            warn!(test = %progress.label, state = %progress.state, code = e.error_code(), error = %e, "harness failed");
            staging.close_all().await;
            progress.advance(HarnessState::Closed);
            return Err(e);
        }
    };
    let mut pair = match staging.into_pair(port, progress) {
        Ok(pair) => pair,
        Err(mut incomplete) => {
            incomplete.close_all().await;
            return Err(StreamError::Closed.into());
        }
    };
    if do_close {
        pair.close().await?;
    }
    Ok(pair)
}

/// Options shared by both harnesses
struct RunOptions {
    exchange: Box<dyn Exchange>,
    chunk_size: Option<usize>,
    timeout: Option<Duration>,
    do_close: bool,
}

impl RunOptions {
    fn new(exchange: impl Exchange + 'static) -> Self {
        Self {
            exchange: Box::new(exchange),
            chunk_size: None,
            timeout: None,
            do_close: true,
        }
    }

    fn wait(&self, ctx: &LibraryContext) -> Duration {
        self.timeout.unwrap_or(ctx.config().wait_timeout)
    }

    fn params(&self, ctx: &LibraryContext) -> ExchangeParams {
        ExchangeParams {
            chunk_size: self.chunk_size.or(ctx.config().chunk_size),
            timeout: self.wait(ctx),
            io_size: ctx.config().io_size,
        }
    }

    async fn exchange(
        &self,
        ctx: &LibraryContext,
        io1: &mut Endpoint,
        io2: &mut Endpoint,
        progress: &mut Progress,
    ) -> Result<()> {
        progress.advance(HarnessState::Exchanging);
        info!(test = %progress.label, exchange = self.exchange.name(), "running exchange");
        self.exchange.run(io1, io2, &self.params(ctx)).await?;
        progress.advance(HarnessState::Asserting);
        Ok(())
    }
}

/// Listen on one descriptor, connect with another, run an exchange
pub struct TestAccept<'ctx> {
    ctx: &'ctx LibraryContext,
    connect: Descriptor,
    accept: Descriptor,
    io1_dummy_write: Option<Vec<u8>>,
    expected_raddr: Option<String>,
    expected_acc_laddr: Option<String>,
    options: RunOptions,
}

impl TestAccept<'static> {
    /// Harness on the global context
    ///
    /// `connect` normally leaves its port empty (`"tcp,localhost,"`); it
    /// is filled in with the acceptor's port.
    pub fn new(connect: &str, accept: &str, exchange: impl Exchange + 'static) -> Result<Self> {
        TestAccept::new_in(LibraryContext::global(), connect, accept, exchange)
    }
}

impl<'ctx> TestAccept<'ctx> {
    /// Harness on a specific context
    pub fn new_in(
        ctx: &'ctx LibraryContext,
        connect: &str,
        accept: &str,
        exchange: impl Exchange + 'static,
    ) -> Result<Self> {
        Ok(Self {
            ctx,
            connect: connect.parse()?,
            accept: accept.parse()?,
            io1_dummy_write: None,
            expected_raddr: None,
            expected_acc_laddr: None,
            options: RunOptions::new(exchange),
        })
    }

    /// Write `data` from io1 right after connecting
    ///
    /// Datagram acceptors only see a peer once it sends something. The
    /// harness reads the payload back on io2 before the exchange.
    pub fn io1_dummy_write(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.io1_dummy_write = Some(data.into());
        self
    }

    /// Expected remote address of io1, without the port
    pub fn expected_raddr(mut self, prefix: impl Into<String>) -> Self {
        self.expected_raddr = Some(prefix.into());
        self
    }

    /// Expected local address of the acceptor, without the port
    pub fn expected_acc_laddr(mut self, prefix: impl Into<String>) -> Self {
        self.expected_acc_laddr = Some(prefix.into());
        self
    }

    /// Largest write the exchange issues
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.options.chunk_size = Some(size.max(1));
        self
    }

    /// Close the pair when done (default), or hand it back open
    pub fn do_close(mut self, close: bool) -> Self {
        self.options.do_close = close;
        self
    }

    /// Override the context's wait timeout
    pub fn timeout(mut self, wait: Duration) -> Self {
        self.options.timeout = Some(wait);
        self
    }

    /// Run the harness
    pub async fn run(self) -> Result<AcceptPair> {
        let mut progress = Progress::new(format!("accept {} from {}", self.accept, self.connect));
        let mut staging = Staging::default();
        let outcome = self.drive(&mut staging, &mut progress).await;
        conclude(outcome, staging, progress, self.options.do_close).await
    }

    async fn drive(&self, staging: &mut Staging, progress: &mut Progress) -> Result<u16> {
        let ctx = self.ctx;
        let wait = self.options.wait(ctx);
        let Staging {
            acceptor, io1, io2, ..
        } = staging;

        let acceptor = acceptor.insert(ctx.open_acceptor(&self.accept).await?);
        progress.advance(HarnessState::Listening);
        let port = acceptor.port()?;
        let target = fill_port(&self.connect, port);
        debug!(%target, port, "connecting");

        let dummy = self.io1_dummy_write.as_deref();
        let connect_side = async {
            let ep = io1.insert(ctx.connect(&target).await?);
            if let Some(data) = dummy {
                ep.write_all(data).await?;
            }
            Ok::<_, HarnessError>(())
        };
        let accept_side = async {
            *io2 = Some(acceptor.accept().await?);
            Ok::<_, HarnessError>(())
        };
        bounded("connect", wait, async {
            tokio::try_join!(connect_side, accept_side)
        })
        .await?;
        progress.advance(HarnessState::Connected);

        let io1 = io1.as_mut().ok_or(StreamError::Closed)?;
        let io2 = io2.as_mut().ok_or(StreamError::Closed)?;

        if let Some(data) = dummy {
            let mut buf = vec![0u8; data.len()];
            bounded("read", wait, async { io2.read_exact(&mut buf).await.map_err(HarnessError::from) }).await?;
            expect_bytes_eq(data, &buf)?;
        }
        if let Some(prefix) = &self.expected_raddr {
            assert_addr(&mut *io1, ControlDepth::First, ControlOption::RemoteAddr, prefix, port).await?;
        }
        if let Some(prefix) = &self.expected_acc_laddr {
            assert_addr(&mut *acceptor, ControlDepth::First, ControlOption::LocalAddr, prefix, port).await?;
        }

        self.options.exchange(ctx, io1, io2, progress).await?;
        Ok(port)
    }
}

/// Listen on one descriptor and connect from a second acceptor
pub struct TestAcceptConnect<'ctx> {
    ctx: &'ctx LibraryContext,
    accept: Descriptor,
    connector: Descriptor,
    target: Descriptor,
    options: RunOptions,
}

impl TestAcceptConnect<'static> {
    /// Harness on the global context
    ///
    /// `accept` is the listener, `connector` the acceptor that originates
    /// the connection, and `target` what it connects to (port left empty).
    pub fn new(
        accept: &str,
        connector: &str,
        target: &str,
        exchange: impl Exchange + 'static,
    ) -> Result<Self> {
        TestAcceptConnect::new_in(LibraryContext::global(), accept, connector, target, exchange)
    }
}

impl<'ctx> TestAcceptConnect<'ctx> {
    /// Harness on a specific context
    pub fn new_in(
        ctx: &'ctx LibraryContext,
        accept: &str,
        connector: &str,
        target: &str,
        exchange: impl Exchange + 'static,
    ) -> Result<Self> {
        Ok(Self {
            ctx,
            accept: accept.parse()?,
            connector: connector.parse()?,
            target: target.parse()?,
            options: RunOptions::new(exchange),
        })
    }

    /// Largest write the exchange issues
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.options.chunk_size = Some(size.max(1));
        self
    }

    /// Close the pair when done (default), or hand it back open
    pub fn do_close(mut self, close: bool) -> Self {
        self.options.do_close = close;
        self
    }

    /// Override the context's wait timeout
    pub fn timeout(mut self, wait: Duration) -> Self {
        self.options.timeout = Some(wait);
        self
    }

    /// Run the harness
    pub async fn run(self) -> Result<AcceptPair> {
        let mut progress = Progress::new(format!(
            "accept {} from {} via {}",
            self.accept, self.target, self.connector
        ));
        let mut staging = Staging::default();
        let outcome = self.drive(&mut staging, &mut progress).await;
        conclude(outcome, staging, progress, self.options.do_close).await
    }

    async fn drive(&self, staging: &mut Staging, progress: &mut Progress) -> Result<u16> {
        let ctx = self.ctx;
        let wait = self.options.wait(ctx);
        let Staging {
            acceptor,
            connector,
            io1,
            io2,
        } = staging;

        let acceptor = acceptor.insert(ctx.open_acceptor(&self.accept).await?);
        progress.advance(HarnessState::Listening);
        let connector = connector.insert(ctx.open_acceptor(&self.connector).await?);
        let port = acceptor.port()?;
        let target = fill_port(&self.target, port);
        debug!(%target, port, "connecting from acceptor");

        let connect_side = async {
            *io1 = Some(connector.connect_from(&target).await?);
            Ok::<_, HarnessError>(())
        };
        let accept_side = async {
            *io2 = Some(acceptor.accept().await?);
            Ok::<_, HarnessError>(())
        };
        bounded("connect", wait, async {
            tokio::try_join!(connect_side, accept_side)
        })
        .await?;
        progress.advance(HarnessState::Connected);

        let io1 = io1.as_mut().ok_or(StreamError::Closed)?;
        let io2 = io2.as_mut().ok_or(StreamError::Closed)?;
        self.options.exchange(ctx, io1, io2, progress).await?;
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::DataTransfer;

    #[test]
    fn test_fill_port_only_when_pending() {
        let pending: Descriptor = "tcp,localhost,".parse().unwrap();
        assert_eq!(fill_port(&pending, 99).to_string(), "tcp,localhost,99");

        let fixed: Descriptor = "tcp,localhost,7".parse().unwrap();
        assert_eq!(fill_port(&fixed, 99).to_string(), "tcp,localhost,7");
    }

    #[test]
    fn test_bad_descriptor_rejected_up_front() {
        let err = TestAccept::new("bogus,localhost,", "tcp,0", DataTransfer::default())
            .err()
            .unwrap();
        assert!(matches!(err, HarnessError::Stream(ref e) if e.is_descriptor_error()));
    }

    #[tokio::test]
    async fn test_connect_timeout_is_reported() {
        let err = bounded("accept", Duration::from_millis(10), async {
            std::future::pending::<Result<()>>().await
        })
        .await
        .unwrap_err();
        assert!(matches!(err, HarnessError::Timeout { stage: "accept", .. }));
    }

    #[tokio::test]
    async fn test_failed_run_leaves_nothing_open() {
        let ctx = LibraryContext::new(Default::default());
        ctx.shutdown();
        let err = TestAccept::new_in(&ctx, "tcp,127.0.0.1,", "tcp,127.0.0.1,0", DataTransfer::default())
            .unwrap()
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Stream(StreamError::ContextShutdown)));
    }
}
