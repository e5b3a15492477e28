//! Two-endpoint relay
//!
//! Shuttles data between a local and a remote endpoint until one side
//! goes away. Data read from the local side can carry an escape
//! character; the byte after it is a command:
//!
//! - the escape character again sends the escape character itself
//! - `q` ends the relay
//! - `b` sends a break on the remote side (ignored if unsupported)
//!
//! Any other command is passed to the [`EscapeHandler`], which may ask
//! for a multi-character sequence terminated by `\r` or `\n`. Commands
//! nobody recognises are dropped.

use async_trait::async_trait;
use tracing::{debug, info};

use streamio_core::{ControlDepth, ControlOption, Result, StreamError, DEFAULT_READ_BUFFER};

use crate::endpoint::Endpoint;

/// Hook for escape commands the relay does not handle itself
#[async_trait]
pub trait EscapeHandler: Send {
    /// Handle escape command `c`; return `true` to collect a
    /// multi-character sequence for [`EscapeHandler::handle_multichar`]
    async fn handle_escape(&mut self, c: u8, remote: &mut Endpoint) -> Result<bool>;

    /// Handle a collected multi-character sequence
    async fn handle_multichar(&mut self, _data: &[u8], _remote: &mut Endpoint) -> Result<()> {
        Ok(())
    }
}

/// Why a relay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The escape-quit command was received
    Quit,
    /// The local endpoint reached end of stream
    LocalClosed,
    /// The remote endpoint reached end of stream
    RemoteClosed,
}

#[derive(Debug, Default)]
enum EscapeState {
    #[default]
    Normal,
    Escaped,
    Collecting(Vec<u8>),
}

/// Bidirectional relay between two endpoints
pub struct Relay {
    escape: Option<u8>,
    handler: Option<Box<dyn EscapeHandler>>,
    state: EscapeState,
    buffer_size: usize,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay {
    /// A relay with no escape character
    pub fn new() -> Self {
        Self {
            escape: None,
            handler: None,
            state: EscapeState::Normal,
            buffer_size: DEFAULT_READ_BUFFER,
        }
    }

    /// Watch local input for `c`
    pub fn with_escape_char(mut self, c: u8) -> Self {
        self.escape = Some(c);
        self
    }

    /// Install a handler for extra escape commands
    pub fn with_handler(mut self, handler: impl EscapeHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Per-read buffer size
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Run until one side closes or quit is requested
    pub async fn run(&mut self, local: &mut Endpoint, remote: &mut Endpoint) -> Result<RelayExit> {
        let mut local_buf = vec![0u8; self.buffer_size];
        let mut remote_buf = vec![0u8; self.buffer_size];
        info!(local = local.name(), remote = remote.name(), "relay started");

        let exit = loop {
            tokio::select! {
                res = local.read(&mut local_buf) => match res {
                    Ok(n) => {
                        if let Some(exit) = self.from_local(&local_buf[..n], remote).await? {
                            break exit;
                        }
                    }
                    Err(StreamError::RemoteClosed) => break RelayExit::LocalClosed,
                    Err(e) => return Err(e),
                },
                res = remote.read(&mut remote_buf) => match res {
                    Ok(n) => local.write_all(&remote_buf[..n]).await?,
                    Err(StreamError::RemoteClosed) => break RelayExit::RemoteClosed,
                    Err(e) => return Err(e),
                },
            }
        };

        info!(?exit, "relay stopped");
        Ok(exit)
    }

    async fn from_local(&mut self, data: &[u8], remote: &mut Endpoint) -> Result<Option<RelayExit>> {
        let Some(esc) = self.escape else {
            remote.write_all(data).await?;
            return Ok(None);
        };

        let mut out = Vec::with_capacity(data.len());
        for &c in data {
            match std::mem::take(&mut self.state) {
                EscapeState::Normal if c == esc => self.state = EscapeState::Escaped,
                EscapeState::Normal => out.push(c),
                EscapeState::Escaped if c == esc => out.push(esc),
                EscapeState::Escaped => {
                    flush(&mut out, remote).await?;
                    match c {
                        b'q' => return Ok(Some(RelayExit::Quit)),
                        b'b' => send_break(remote).await?,
                        _ => self.dispatch_escape(c, remote).await?,
                    }
                }
                EscapeState::Collecting(seq) if c == b'\r' || c == b'\n' => {
                    flush(&mut out, remote).await?;
                    if let Some(handler) = self.handler.as_mut() {
                        handler.handle_multichar(&seq, remote).await?;
                    }
                }
                EscapeState::Collecting(mut seq) => {
                    seq.push(c);
                    self.state = EscapeState::Collecting(seq);
                }
            }
        }
        flush(&mut out, remote).await?;
        Ok(None)
    }

    async fn dispatch_escape(&mut self, c: u8, remote: &mut Endpoint) -> Result<()> {
        match self.handler.as_mut() {
            Some(handler) => {
                if handler.handle_escape(c, remote).await? {
                    self.state = EscapeState::Collecting(Vec::new());
                }
            }
            None => debug!(command = c, "unrecognised escape dropped"),
        }
        Ok(())
    }
}

async fn flush(out: &mut Vec<u8>, remote: &mut Endpoint) -> Result<()> {
    if !out.is_empty() {
        remote.write_all(out).await?;
        out.clear();
    }
    Ok(())
}

async fn send_break(remote: &mut Endpoint) -> Result<()> {
    match remote
        .control(ControlDepth::First, false, ControlOption::SendBreak, None)
        .await
    {
        Ok(_) => Ok(()),
        Err(StreamError::NotSupported(_)) => {
            debug!(endpoint = remote.name(), "break not supported, ignored");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
