//! Filter layers stacked on top of a transport
//!
//! - [`telnet`] - RFC 854 framing with option negotiation and break

pub mod telnet;

pub use telnet::{TelnetAcceptor, TelnetEndpoint};
