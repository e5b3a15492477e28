//! Acceptors
//!
//! An acceptor listens on a descriptor and hands out one [`Endpoint`] per
//! incoming connection. Acceptors can also originate connections with
//! their own protocol stack ([`StreamAcceptor::connect_from`]), which is
//! how a layered stack is exercised from both ends.

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use tracing::debug;

use streamio_core::{
    format_addrs, ControlDepth, ControlOption, ControlRequest, Descriptor, Result, StreamError,
};

use crate::endpoint::Endpoint;

/// Trait implemented by transport and filter acceptors
#[async_trait]
pub trait StreamAcceptor: Send {
    /// Wait for the next incoming connection
    async fn accept(&mut self) -> Result<Endpoint>;

    /// Open an outbound connection using this acceptor's stack
    async fn connect_from(&mut self, target: &Descriptor) -> Result<Endpoint>;

    /// Addresses the acceptor is bound to
    fn local_addrs(&self) -> Vec<SocketAddr>;

    /// Descriptor the acceptor was opened with
    fn descriptor(&self) -> &Descriptor;

    /// Answer a control request; addresses and port are handled here
    async fn control(&mut self, req: &ControlRequest) -> Result<String> {
        if !req.get {
            return Err(req.option.unsupported());
        }
        match req.option {
            ControlOption::LocalAddr => Ok(format_addrs(&self.local_addrs())),
            ControlOption::LocalPort => self
                .local_addrs()
                .first()
                .map(|a| a.port().to_string())
                .ok_or_else(|| StreamError::NotSupported("acceptor has no address".to_string())),
            _ => Err(req.option.unsupported()),
        }
    }

    /// Stop listening
    async fn shutdown(&mut self) -> Result<()>;
}

/// An owned acceptor handle
pub struct Acceptor {
    inner: Box<dyn StreamAcceptor>,
    closed: bool,
}

impl Acceptor {
    /// Wrap an acceptor implementation
    pub fn new(inner: impl StreamAcceptor + 'static) -> Self {
        Self::from_boxed(Box::new(inner))
    }

    /// Wrap an already boxed acceptor
    pub fn from_boxed(inner: Box<dyn StreamAcceptor>) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(StreamError::Closed)
        } else {
            Ok(())
        }
    }

    /// Wait for the next connection
    pub async fn accept(&mut self) -> Result<Endpoint> {
        self.check_open()?;
        let ep = self.inner.accept().await?;
        debug!(acceptor = %self.inner.descriptor(), endpoint = ep.name(), "accepted connection");
        Ok(ep)
    }

    /// Originate a connection with this acceptor's stack
    pub async fn connect_from(&mut self, target: &Descriptor) -> Result<Endpoint> {
        self.check_open()?;
        if !self.inner.descriptor().stack_matches(target) {
            return Err(StreamError::invalid_descriptor(
                target.to_string(),
                format!("stack does not match acceptor {}", self.inner.descriptor()),
            ));
        }
        self.inner.connect_from(target).await
    }

    /// Bound addresses
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.inner.local_addrs()
    }

    /// Port of the first bound address
    pub fn port(&self) -> Result<u16> {
        self.local_addrs()
            .first()
            .map(SocketAddr::port)
            .ok_or_else(|| StreamError::NotSupported("acceptor has no address".to_string()))
    }

    /// Descriptor the acceptor was opened with
    pub fn descriptor(&self) -> &Descriptor {
        self.inner.descriptor()
    }

    /// Issue a control request
    pub async fn control(
        &mut self,
        depth: impl Into<ControlDepth>,
        get: bool,
        option: ControlOption,
        value: Option<&str>,
    ) -> Result<String> {
        self.check_open()?;
        let req = ControlRequest {
            depth: depth.into(),
            get,
            option,
            value: value.map(str::to_string),
        };
        self.inner.control(&req).await
    }

    /// Stop listening; closing twice does nothing
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(acceptor = %self.inner.descriptor(), "closing acceptor");
        self.inner.shutdown().await
    }

    /// Whether the acceptor is still listening
    pub fn is_open(&self) -> bool {
        !self.closed
    }
}

impl fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptor")
            .field("descriptor", &self.inner.descriptor().to_string())
            .field("closed", &self.closed)
            .finish()
    }
}
