//! streamio-harness - acceptor/connector test harness
//!
//! Builds an acceptor from a descriptor, connects a counterpart, runs an
//! exchange routine over the pair, asserts on control-query answers and
//! tears everything down.
//!
//! - [`context`] - process-wide [`LibraryContext`] and [`HarnessConfig`]
//! - [`harness`] - [`TestAccept`] and [`TestAcceptConnect`]
//! - [`exchange`] - data, urgent, small-chunk and random exchanges
//! - [`assert`] - control-query and data assertions
//!
//! # Example
//!
//! ```rust,no_run
//! use streamio_core::ControlOption;
//! use streamio_harness::{assert_control, DataTransfer, TestAccept};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut pair = TestAccept::new("sctp,localhost,", "sctp,0", DataTransfer::default())?
//!         .do_close(false)
//!         .run()
//!         .await?;
//!
//!     assert_control(&mut pair.io1, 0, ControlOption::Streams, "instreams=1,ostreams=1").await?;
//!     pair.close().await?;
//!     Ok(())
//! }
//! ```

pub mod assert;
pub mod context;
pub mod error;
pub mod exchange;
pub mod harness;

// Re-exports
pub use assert::{
    assert_addr, assert_control, expect_bytes_eq, expect_eq, ControlTarget, DataMismatch, Mismatch,
};
pub use context::{HarnessConfig, LibraryContext, DEFAULT_IO_SIZE};
pub use error::{HarnessError, Result};
pub use exchange::{
    test_dataxfer, test_dataxfer_oob, DataTransfer, Exchange, ExchangeParams, RandomTransfer,
    SmallTransfer, UrgentTransfer,
};
pub use harness::{AcceptPair, HarnessState, TestAccept, TestAcceptConnect};
pub use streamio_net::sctp_supported;
