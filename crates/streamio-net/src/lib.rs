//! streamio-net - endpoints and acceptors for stream testing
//!
//! This crate provides the transports the streamio harness drives, behind
//! one async interface.
//!
//! # Overview
//!
//! - **Endpoints**: [`StreamEndpoint`] implementations wrapped in an owned
//!   [`Endpoint`] handle that closes exactly once
//! - **Acceptors**: [`StreamAcceptor`] implementations wrapped in
//!   [`Acceptor`], able to accept and to originate connections
//! - **TCP**: stream sockets with urgent (out-of-band) data
//! - **UDP**: connected sockets, with per-peer demultiplexing when accepting
//! - **SCTP**: one-to-one associations with stream-count control (Linux)
//! - **Telnet**: framing filter with option negotiation, over any transport
//! - **Relay**: bridges two endpoints with escape-character commands
//!
//! # Example
//!
//! ```rust,no_run
//! use streamio_core::{Descriptor, EndpointConfig};
//! use streamio_net::{connect, open_acceptor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EndpointConfig::default();
//!     let mut acceptor = open_acceptor(&"tcp,127.0.0.1,0".parse()?, &config).await?;
//!
//!     let target: Descriptor = "tcp,127.0.0.1,".parse()?;
//!     let target = target.with_port(acceptor.port()?);
//!
//!     let (client, server) = tokio::join!(connect(&target, &config), acceptor.accept());
//!     let (mut client, mut server) = (client?, server?);
//!
//!     client.write_all(b"ping").await?;
//!     let mut buf = [0u8; 4];
//!     server.read_exact(&mut buf).await?;
//!
//!     client.close().await?;
//!     server.close().await?;
//!     acceptor.close().await?;
//!     Ok(())
//! }
//! ```

pub mod acceptor;
pub mod endpoint;
pub mod filter;
pub mod open;
pub mod relay;
pub mod transport;

// Re-exports
pub use acceptor::{Acceptor, StreamAcceptor};
pub use endpoint::{ConnectionState, Endpoint, StreamEndpoint};
pub use filter::{TelnetAcceptor, TelnetEndpoint};
pub use open::{connect, open_acceptor};
pub use relay::{EscapeHandler, Relay, RelayExit};
pub use transport::{
    sctp_supported, SctpAcceptor, SctpEndpoint, TcpAcceptor, TcpEndpoint, UdpAcceptor, UdpEndpoint,
};
