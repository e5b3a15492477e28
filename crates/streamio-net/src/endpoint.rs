//! Endpoint handles
//!
//! [`StreamEndpoint`] is the trait every transport and filter implements.
//! [`Endpoint`] wraps one boxed implementation and owns its lifecycle: it
//! tracks the connection state and guarantees the underlying endpoint is
//! closed at most once.

use async_trait::async_trait;
use std::fmt;
use tracing::{debug, trace};

use streamio_core::{ControlDepth, ControlOption, ControlRequest, Result, StreamError};

/// Trait implemented by transports and filter layers
///
/// Reads return the number of bytes placed in `buf`; end of stream is
/// reported as [`StreamError::RemoteClosed`], never as `Ok(0)`.
#[async_trait]
pub trait StreamEndpoint: Send {
    /// Read available data into `buf`
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write some of `data`, returning how many bytes were taken
    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Send urgent (out-of-band) data
    async fn write_urgent(&mut self, _data: &[u8]) -> Result<()> {
        Err(StreamError::NotSupported("urgent data".to_string()))
    }

    /// Receive urgent (out-of-band) data
    async fn read_urgent(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(StreamError::NotSupported("urgent data".to_string()))
    }

    /// Answer a control request
    async fn control(&mut self, req: &ControlRequest) -> Result<String>;

    /// Release the underlying resources
    async fn close(&mut self) -> Result<()>;

    /// Descriptive name (for logging)
    fn name(&self) -> &str;
}

/// Lifecycle of an endpoint handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Established and usable
    Connected,
    /// Closed locally
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// An owned handle to one side of a connection
pub struct Endpoint {
    inner: Box<dyn StreamEndpoint>,
    state: ConnectionState,
}

impl Endpoint {
    /// Wrap an established endpoint
    pub fn new(inner: impl StreamEndpoint + 'static) -> Self {
        Self::from_boxed(Box::new(inner))
    }

    /// Wrap an already boxed endpoint
    pub fn from_boxed(inner: Box<dyn StreamEndpoint>) -> Self {
        Self {
            inner,
            state: ConnectionState::Connected,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the handle can still be used
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Descriptive name
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StreamError::Closed)
        }
    }

    /// Read available data
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let n = self.inner.read(buf).await?;
        trace!(endpoint = self.inner.name(), bytes = n, "read");
        Ok(n)
    }

    /// Fill `buf` completely
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut pos = 0;
        while pos < buf.len() {
            pos += self.read(&mut buf[pos..]).await?;
        }
        Ok(())
    }

    /// Write some of `data`
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_open()?;
        let n = self.inner.write(data).await?;
        trace!(endpoint = self.inner.name(), bytes = n, "write");
        Ok(n)
    }

    /// Write all of `data`
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut pos = 0;
        while pos < data.len() {
            pos += self.write(&data[pos..]).await?;
        }
        Ok(())
    }

    /// Send urgent data
    pub async fn write_urgent(&mut self, data: &[u8]) -> Result<()> {
        self.check_open()?;
        self.inner.write_urgent(data).await
    }

    /// Receive urgent data
    pub async fn read_urgent(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        self.inner.read_urgent(buf).await
    }

    /// Issue a control request
    pub async fn control(
        &mut self,
        depth: impl Into<ControlDepth>,
        get: bool,
        option: ControlOption,
        value: Option<&str>,
    ) -> Result<String> {
        let req = ControlRequest {
            depth: depth.into(),
            get,
            option,
            value: value.map(str::to_string),
        };
        self.control_request(&req).await
    }

    /// Issue a prepared control request
    pub async fn control_request(&mut self, req: &ControlRequest) -> Result<String> {
        self.check_open()?;
        self.inner.control(req).await
    }

    /// Close the endpoint; closing a closed endpoint does nothing
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.state = ConnectionState::Closed;
        debug!(endpoint = self.inner.name(), "closing endpoint");
        self.inner.close().await
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.inner.name())
            .field("state", &self.state)
            .finish()
    }
}
