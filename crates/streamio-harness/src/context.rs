//! Process-wide library context
//!
//! The context owns the harness defaults and the logging setup. One
//! instance is created lazily for the whole process
//! ([`LibraryContext::global`]); tests that need different settings build
//! their own with [`LibraryContext::new`].
//!
//! After [`LibraryContext::shutdown`] every attempt to open a new handle
//! through the context fails with [`StreamError::ContextShutdown`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Once, OnceLock};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use streamio_core::config::humantime_serde;
use streamio_core::{Descriptor, EndpointConfig, StreamError, DEFAULT_TIMEOUT_MS};
use streamio_net::{Acceptor, Endpoint};

use crate::error::{HarnessError, Result};

/// Default payload size for random transfers
pub const DEFAULT_IO_SIZE: usize = 1000;

/// Default log filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "streamio_harness=info,streamio_net=info";

static GLOBAL: OnceLock<LibraryContext> = OnceLock::new();
static TRACING: Once = Once::new();

/// Harness defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Bound on every harness wait (accept, connect, read)
    #[serde(with = "humantime_serde", default = "default_wait")]
    pub wait_timeout: Duration,

    /// Default write chunk size; `None` writes as much as the endpoint takes
    #[serde(default)]
    pub chunk_size: Option<usize>,

    /// Payload size for random transfers
    #[serde(default = "default_io_size")]
    pub io_size: usize,

    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Settings for the endpoints the harness opens
    #[serde(default)]
    pub endpoint: EndpointConfig,
}

fn default_wait() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT_MS)
}

fn default_io_size() -> usize {
    DEFAULT_IO_SIZE
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            wait_timeout: default_wait(),
            chunk_size: None,
            io_size: DEFAULT_IO_SIZE,
            log_filter: default_log_filter(),
            endpoint: EndpointConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Set the wait timeout (also used for connects and negotiation)
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self.endpoint.connect_timeout = timeout;
        self
    }

    /// Set the default chunk size
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Set the random transfer size
    pub fn with_io_size(mut self, size: usize) -> Self {
        self.io_size = size;
        self
    }
}

/// Install the fmt subscriber once per process
fn init_tracing(filter: &str) {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
        // another subscriber may already be installed by the test binary
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Library context
#[derive(Debug)]
pub struct LibraryContext {
    config: HarnessConfig,
    shut_down: AtomicBool,
}

impl LibraryContext {
    /// Create a standalone context
    pub fn new(config: HarnessConfig) -> Self {
        init_tracing(&config.log_filter);
        debug!(?config, "library context created");
        Self {
            config,
            shut_down: AtomicBool::new(false),
        }
    }

    /// The process-wide context, created with defaults on first use
    pub fn global() -> &'static LibraryContext {
        GLOBAL.get_or_init(|| LibraryContext::new(HarnessConfig::default()))
    }

    /// Create the process-wide context with explicit settings
    ///
    /// Fails if the global context already exists.
    pub fn init_global(config: HarnessConfig) -> Result<&'static LibraryContext> {
        let mut created = false;
        let ctx = GLOBAL.get_or_init(|| {
            created = true;
            LibraryContext::new(config)
        });
        if created {
            Ok(ctx)
        } else {
            Err(HarnessError::AlreadyInitialized)
        }
    }

    /// Harness settings
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Mark the context as torn down
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            info!("library context shut down");
        }
    }

    /// Whether [`LibraryContext::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Fail if the context has been shut down
    pub fn ensure_active(&self) -> streamio_core::Result<()> {
        if self.is_shut_down() {
            Err(StreamError::ContextShutdown)
        } else {
            Ok(())
        }
    }

    /// Open an acceptor with the context's endpoint settings
    pub async fn open_acceptor(&self, descriptor: &Descriptor) -> streamio_core::Result<Acceptor> {
        self.ensure_active()?;
        streamio_net::open_acceptor(descriptor, &self.config.endpoint).await
    }

    /// Connect with the context's endpoint settings
    pub async fn connect(&self, descriptor: &Descriptor) -> streamio_core::Result<Endpoint> {
        self.ensure_active()?;
        streamio_net::connect(descriptor, &self.config.endpoint).await
    }
}
