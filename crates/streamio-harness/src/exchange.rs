//! Exchange routines
//!
//! An exchange drives data across a connected pair and fails on the first
//! difference. `io1` is always the connecting side and `io2` the accepted
//! side.

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

use streamio_core::{ControlDepth, ControlOption};
use streamio_net::Endpoint;

use crate::assert::{expect_bytes_eq, DataMismatch, ExpectedBytes};
use crate::error::{HarnessError, Result};

/// Payload used by [`DataTransfer`] unless another is given
pub const DEFAULT_PAYLOAD: &[u8] = b"This is a test string!";

/// Urgent payload; TCP delivers a single urgent byte per send
pub const DEFAULT_URGENT_PAYLOAD: &[u8] = b"A";

/// Chunk size [`SmallTransfer`] falls back to
pub const DEFAULT_SMALL_CHUNK: usize = 64;

/// Payload size [`SmallTransfer`] sends each way
pub const SMALL_TRANSFER_SIZE: usize = 512;

/// Settings handed to an exchange by the harness
#[derive(Debug, Clone)]
pub struct ExchangeParams {
    /// Largest write to issue; `None` leaves it to the endpoint
    pub chunk_size: Option<usize>,
    /// Bound on every read
    pub timeout: Duration,
    /// Payload size for random transfers
    pub io_size: usize,
}

/// A routine run over a connected pair
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Name for log lines
    fn name(&self) -> &str;

    /// Run the exchange
    async fn run(&self, io1: &mut Endpoint, io2: &mut Endpoint, params: &ExchangeParams) -> Result<()>;
}

/// Send `data` from `src` and check that `dst` receives exactly it
///
/// Writes are split at the chunk size and at the sender's
/// `MaxWritePacket`, whichever is smaller.
pub async fn test_dataxfer(
    src: &mut Endpoint,
    dst: &mut Endpoint,
    data: &[u8],
    params: &ExchangeParams,
) -> Result<()> {
    let chunk = write_limit(src, params.chunk_size).await;
    debug!(bytes = data.len(), ?chunk, "data transfer");

    let writer = async {
        for piece in data.chunks(chunk.unwrap_or(data.len()).max(1)) {
            src.write_all(piece).await?;
        }
        Ok::<_, HarnessError>(())
    };
    let reader = async {
        let mut received = Vec::with_capacity(data.len());
        let mut buf = vec![0u8; data.len().clamp(1, 65536)];
        while received.len() < data.len() {
            let want = (data.len() - received.len()).min(buf.len());
            let n = timeout(params.timeout, dst.read(&mut buf[..want]))
                .await
                .map_err(|_| read_timeout(params.timeout))??;
            let start = received.len();
            received.extend_from_slice(&buf[..n]);
            expect_bytes_eq(&data[start..start + n], &received[start..])
                .map_err(|e| shift(e, start))?;
        }
        Ok::<_, HarnessError>(())
    };

    tokio::try_join!(writer, reader)?;
    Ok(())
}

/// Send `data` as urgent data and check that `dst` receives it urgently
pub async fn test_dataxfer_oob(
    src: &mut Endpoint,
    dst: &mut Endpoint,
    data: &[u8],
    params: &ExchangeParams,
) -> Result<()> {
    src.write_urgent(data).await?;

    let mut received = vec![0u8; data.len()];
    let mut pos = 0;
    while pos < data.len() {
        pos += timeout(params.timeout, dst.read_urgent(&mut received[pos..]))
            .await
            .map_err(|_| read_timeout(params.timeout))??;
    }
    expect_bytes_eq(data, &received)?;
    Ok(())
}

async fn write_limit(src: &mut Endpoint, chunk_size: Option<usize>) -> Option<usize> {
    let max_packet = src
        .control(ControlDepth::First, true, ControlOption::MaxWritePacket, None)
        .await
        .ok()
        .and_then(|v| v.parse::<usize>().ok());
    match (chunk_size, max_packet) {
        (Some(c), Some(m)) => Some(c.min(m)),
        (c, m) => c.or(m),
    }
}

fn read_timeout(wait: Duration) -> HarnessError {
    HarnessError::Timeout {
        stage: "read",
        duration_ms: wait.as_millis() as u64,
    }
}

fn shift(e: DataMismatch, base: usize) -> DataMismatch {
    match e {
        DataMismatch::Byte {
            offset,
            expected,
            actual,
        } => DataMismatch::Byte {
            offset: offset + base,
            expected,
            actual,
        },
        other => other,
    }
}

/// Transfer `data` io1 to io2, then io2 to io1, logging each direction
async fn both_ways(
    io1: &mut Endpoint,
    io2: &mut Endpoint,
    data: &[u8],
    params: &ExchangeParams,
    urgent: bool,
) -> Result<()> {
    info!("  testing io1 to io2");
    if urgent {
        test_dataxfer_oob(io1, io2, data, params).await?;
    } else {
        test_dataxfer(io1, io2, data, params).await?;
    }
    info!("  testing io2 to io1");
    if urgent {
        test_dataxfer_oob(io2, io1, data, params).await?;
    } else {
        test_dataxfer(io2, io1, data, params).await?;
    }
    info!("  Success!");
    Ok(())
}

/// Ordinary data in both directions
#[derive(Debug, Clone)]
pub struct DataTransfer {
    payload: Vec<u8>,
}

impl Default for DataTransfer {
    fn default() -> Self {
        Self {
            payload: DEFAULT_PAYLOAD.to_vec(),
        }
    }
}

impl DataTransfer {
    /// Transfer a specific payload
    pub fn with_payload(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

#[async_trait]
impl Exchange for DataTransfer {
    fn name(&self) -> &str {
        "data"
    }

    async fn run(&self, io1: &mut Endpoint, io2: &mut Endpoint, params: &ExchangeParams) -> Result<()> {
        debug!(payload = %ExpectedBytes(&self.payload), "data exchange");
        both_ways(io1, io2, &self.payload, params, false).await
    }
}

/// Urgent data in both directions
#[derive(Debug, Clone)]
pub struct UrgentTransfer {
    payload: Vec<u8>,
}

impl Default for UrgentTransfer {
    fn default() -> Self {
        Self {
            payload: DEFAULT_URGENT_PAYLOAD.to_vec(),
        }
    }
}

impl UrgentTransfer {
    /// Transfer a specific urgent payload
    pub fn with_payload(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

#[async_trait]
impl Exchange for UrgentTransfer {
    fn name(&self) -> &str {
        "urgent"
    }

    async fn run(&self, io1: &mut Endpoint, io2: &mut Endpoint, params: &ExchangeParams) -> Result<()> {
        debug!(payload = %ExpectedBytes(&self.payload), "urgent exchange");
        both_ways(io1, io2, &self.payload, params, true).await
    }
}

/// A payload written in small chunks in both directions
#[derive(Debug, Clone)]
pub struct SmallTransfer {
    payload: Vec<u8>,
}

impl Default for SmallTransfer {
    fn default() -> Self {
        // every byte value, so escaping layers see their special bytes
        let payload = (0..SMALL_TRANSFER_SIZE).map(|i| i as u8).collect();
        Self { payload }
    }
}

#[async_trait]
impl Exchange for SmallTransfer {
    fn name(&self) -> &str {
        "small"
    }

    async fn run(&self, io1: &mut Endpoint, io2: &mut Endpoint, params: &ExchangeParams) -> Result<()> {
        let params = ExchangeParams {
            chunk_size: Some(params.chunk_size.unwrap_or(DEFAULT_SMALL_CHUNK)),
            ..params.clone()
        };
        both_ways(io1, io2, &self.payload, &params, false).await
    }
}

/// Random bytes in both directions, one direction at a time
#[derive(Debug, Clone, Default)]
pub struct RandomTransfer {
    size: Option<usize>,
}

impl RandomTransfer {
    /// Send `size` bytes instead of the configured io size
    pub fn with_size(size: usize) -> Self {
        Self { size: Some(size) }
    }
}

fn random_payload(size: usize) -> Vec<u8> {
    let mut data = vec![0u8; size];
    rand::thread_rng().fill(&mut data[..]);
    data
}

#[async_trait]
impl Exchange for RandomTransfer {
    fn name(&self) -> &str {
        "random"
    }

    async fn run(&self, io1: &mut Endpoint, io2: &mut Endpoint, params: &ExchangeParams) -> Result<()> {
        let size = self.size.unwrap_or(params.io_size);
        let data = random_payload(size);
        debug!(bytes = size, "random exchange");
        both_ways(io1, io2, &data, params, false).await
    }
}
