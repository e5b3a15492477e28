//! streamio-relay - bridge two descriptors
//!
//! Opens the first descriptor (connecting, or accepting a single
//! connection with `--accept`), connects the second, and relays data
//! between them until either side closes or the escape sequence
//! `<escape> q` is typed on the first side.

use clap::Parser;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use streamio_core::{Descriptor, EndpointConfig};
use streamio_net::{Endpoint, Relay, RelayExit};

/// Default escape character, Ctrl-]
const DEFAULT_ESCAPE: u8 = 0x1d;

#[derive(Parser)]
#[command(name = "streamio-relay")]
#[command(about = "Relay data between two stream descriptors")]
struct Args {
    /// Local side, e.g. "tcp,0" with --accept or "telnet,tcp,host,23"
    local: String,

    /// Remote side, e.g. "sctp,localhost,3023"
    remote: String,

    /// Listen on the local descriptor and take the first connection
    #[arg(long, short)]
    accept: bool,

    /// Escape character: a single character, "^X" or a hex byte "0x1d"
    #[arg(long, short, value_parser = parse_escape)]
    escape: Option<u8>,

    /// Connect and negotiation timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

fn parse_escape(s: &str) -> Result<u8, String> {
    let bytes = s.as_bytes();
    match bytes {
        [c] => Ok(*c),
        [b'^', c] => {
            let c = c.to_ascii_uppercase();
            if (b'@'..=b'_').contains(&c) {
                Ok(c - b'@')
            } else {
                Err(format!("'{}' is not a control character", s))
            }
        }
        _ => {
            let hex = s
                .strip_prefix("0x")
                .ok_or_else(|| format!("invalid escape '{}'", s))?;
            u8::from_str_radix(hex, 16).map_err(|e| format!("invalid escape '{}': {}", s, e))
        }
    }
}

async fn open_local(descriptor: &Descriptor, accept: bool, config: &EndpointConfig) -> anyhow::Result<Endpoint> {
    if !accept {
        return Ok(streamio_net::connect(descriptor, config).await?);
    }
    let mut acceptor = streamio_net::open_acceptor(descriptor, config).await?;
    info!("Waiting for a connection on port {}", acceptor.port()?);
    let accepted = acceptor.accept().await;
    acceptor.close().await?;
    Ok(accepted?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let local: Descriptor = args.local.parse()?;
    let remote: Descriptor = args.remote.parse()?;
    let config = EndpointConfig {
        connect_timeout: Duration::from_millis(args.timeout_ms),
        ..EndpointConfig::default()
    };

    let mut local_ep = open_local(&local, args.accept, &config).await?;
    info!("Local side open: {}", local_ep.name());

    let mut remote_ep = match streamio_net::connect(&remote, &config).await {
        Ok(ep) => ep,
        Err(e) => {
            local_ep.close().await?;
            return Err(e.into());
        }
    };
    info!("Remote side open: {}", remote_ep.name());

    let mut relay = Relay::new().with_escape_char(args.escape.unwrap_or(DEFAULT_ESCAPE));
    let outcome = relay.run(&mut local_ep, &mut remote_ep).await;

    for ep in [&mut local_ep, &mut remote_ep] {
        if let Err(e) = ep.close().await {
            warn!("Close of {} failed: {}", ep.name(), e);
        }
    }

    match outcome? {
        RelayExit::Quit => info!("Relay stopped by escape"),
        RelayExit::LocalClosed => info!("Local side closed"),
        RelayExit::RemoteClosed => info!("Remote side closed"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_escape() {
        assert_eq!(parse_escape("~"), Ok(b'~'));
        assert_eq!(parse_escape("^]"), Ok(0x1d));
        assert_eq!(parse_escape("^c"), Ok(0x03));
        assert_eq!(parse_escape("0x1d"), Ok(0x1d));
        assert!(parse_escape("^1").is_err());
        assert!(parse_escape("esc").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["streamio-relay", "-a", "-e", "^]", "tcp,0", "telnet,tcp,localhost,23"])
            .unwrap();
        assert!(args.accept);
        assert_eq!(args.escape, Some(DEFAULT_ESCAPE));
        assert_eq!(args.local, "tcp,0");
        assert_eq!(args.timeout_ms, 5000);
    }
}
