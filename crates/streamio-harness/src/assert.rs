//! Assertions on control queries and transferred data
//!
//! Control answers are compared verbatim against literal strings. Data
//! comparisons report the first differing byte offset.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use streamio_core::address::with_port;
use streamio_core::{ControlDepth, ControlOption};
use streamio_net::{Acceptor, Endpoint};

use crate::error::Result;

/// A value that differed from its expectation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{what} mismatch: expected '{expected}', got '{actual}'")]
pub struct Mismatch {
    /// What was being compared
    pub what: String,
    /// Expected literal
    pub expected: String,
    /// Value actually observed
    pub actual: String,
}

impl Mismatch {
    /// Build a mismatch report
    pub fn new(what: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Received data that differs from what was sent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataMismatch {
    /// A byte differs
    #[error("Mismatch on byte {offset}, expected 0x{expected:02x}, got 0x{actual:02x}")]
    Byte {
        /// Offset of the first differing byte
        offset: usize,
        /// Byte that was sent
        expected: u8,
        /// Byte that arrived
        actual: u8,
    },

    /// The lengths differ while the common prefix matches
    #[error("Length mismatch, expected {expected} bytes, got {actual}")]
    Length {
        /// Bytes sent
        expected: usize,
        /// Bytes received
        actual: usize,
    },
}

/// Compare two strings
pub fn expect_eq(what: &str, expected: &str, actual: &str) -> std::result::Result<(), Mismatch> {
    if expected == actual {
        Ok(())
    } else {
        Err(Mismatch::new(what, expected, actual))
    }
}

/// Compare two byte buffers, reporting the first difference
pub fn expect_bytes_eq(expected: &[u8], actual: &[u8]) -> std::result::Result<(), DataMismatch> {
    if let Some(offset) = expected.iter().zip(actual).position(|(e, a)| e != a) {
        return Err(DataMismatch::Byte {
            offset,
            expected: expected[offset],
            actual: actual[offset],
        });
    }
    if expected.len() != actual.len() {
        return Err(DataMismatch::Length {
            expected: expected.len(),
            actual: actual.len(),
        });
    }
    Ok(())
}

/// Anything that answers control get-queries
#[async_trait]
pub trait ControlTarget: Send {
    /// Name for failure reports
    fn label(&self) -> String;

    /// Issue a get-query
    async fn query(&mut self, depth: ControlDepth, option: ControlOption) -> streamio_core::Result<String>;
}

#[async_trait]
impl ControlTarget for Endpoint {
    fn label(&self) -> String {
        self.name().to_string()
    }

    async fn query(&mut self, depth: ControlDepth, option: ControlOption) -> streamio_core::Result<String> {
        self.control(depth, true, option, None).await
    }
}

#[async_trait]
impl ControlTarget for Acceptor {
    fn label(&self) -> String {
        format!("acceptor {}", self.descriptor())
    }

    async fn query(&mut self, depth: ControlDepth, option: ControlOption) -> streamio_core::Result<String> {
        self.control(depth, true, option, None).await
    }
}

/// Query `option` at `depth` and compare the answer with `expected`
pub async fn assert_control<T: ControlTarget + ?Sized>(
    target: &mut T,
    depth: impl Into<ControlDepth>,
    option: ControlOption,
    expected: &str,
) -> Result<()> {
    let depth = depth.into();
    let actual = target.query(depth, option).await?;
    debug!(on = %target.label(), %option, %actual, "control query");
    expect_eq(&format!("{} {}", target.label(), option), expected, &actual)?;
    Ok(())
}

/// Compare an address query against `prefix` with `port` appended
///
/// Expectations are written without the port (`ipv4,127.0.0.1,`) because
/// the listening port is only known once the acceptor is open.
pub async fn assert_addr<T: ControlTarget + ?Sized>(
    target: &mut T,
    depth: impl Into<ControlDepth>,
    option: ControlOption,
    prefix: &str,
    port: u16,
) -> Result<()> {
    assert_control(target, depth, option, &with_port(prefix, port)).await
}

/// Short rendering of a payload for log lines
pub(crate) struct ExpectedBytes<'a>(pub &'a [u8]);

impl fmt::Display for ExpectedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(self.0) {
            Ok(s) if s.len() <= 32 => write!(f, "{:?}", s),
            _ => write!(f, "{} bytes", self.0.len()),
        }
    }
}
