//! Shared setup for harness integration tests

#![allow(dead_code)]

use std::time::Duration;

use streamio_harness::{sctp_supported, HarnessConfig, LibraryContext};

/// Context with a short wait so failures surface quickly
pub fn context() -> LibraryContext {
    LibraryContext::new(HarnessConfig::default().with_wait_timeout(Duration::from_secs(5)))
}

/// Whether SCTP tests can run; logs the skip when they cannot
pub fn sctp_or_skip(test: &str) -> bool {
    if sctp_supported() {
        return true;
    }
    eprintln!("{}: sctp not supported on this host, skipping", test);
    false
}
