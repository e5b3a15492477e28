//! Telnet framing
//!
//! A filter layer that runs RFC 854 framing over any inner endpoint.
//! Outgoing `0xFF` bytes are doubled, incoming commands are stripped from
//! the data stream, and option negotiation for SUPPRESS-GO-AHEAD and
//! BINARY happens when the layer is set up on either side. Break is sent
//! as `IAC BRK` through the [`ControlOption::SendBreak`] control, and the
//! count of breaks seen from the peer is read back with
//! [`ControlOption::BreaksReceived`].

use async_trait::async_trait;
use std::collections::HashSet;
use std::net::SocketAddr;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use streamio_core::{
    ControlDepth, ControlOption, ControlRequest, Descriptor, EndpointConfig, Result, StreamError,
    TelnetConfig,
};

use crate::acceptor::{Acceptor, StreamAcceptor};
use crate::endpoint::{Endpoint, StreamEndpoint};

/// Interpret As Command
pub const IAC: u8 = 255;
/// Refuse an option on the peer
pub const DONT: u8 = 254;
/// Ask the peer to enable an option
pub const DO: u8 = 253;
/// Refuse to enable an option locally
pub const WONT: u8 = 252;
/// Offer to enable an option locally
pub const WILL: u8 = 251;
/// Subnegotiation begin
pub const SB: u8 = 250;
/// Subnegotiation end
pub const SE: u8 = 240;
/// Break
pub const BRK: u8 = 243;

/// Option: binary transmission
pub const OPT_BINARY: u8 = 0;
/// Option: suppress go-ahead
pub const OPT_SGA: u8 = 3;

/// A command recognised in the incoming stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetCommand {
    /// WILL/WONT/DO/DONT with its option
    Negotiate {
        /// One of [`WILL`], [`WONT`], [`DO`], [`DONT`]
        verb: u8,
        /// Option code
        option: u8,
    },
    /// `IAC BRK`
    Break,
    /// Subnegotiation payload (option byte first)
    Subnegotiation(Vec<u8>),
    /// Any other two-byte command
    Other(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Data,
    Iac,
    Verb(u8),
    Sub,
    SubIac,
}

/// Incremental Telnet stream parser
///
/// Commands may be split across reads; the parser carries its state from
/// one call to the next.
#[derive(Debug)]
pub struct TelnetParser {
    state: ParseState,
    sub: Vec<u8>,
}

impl Default for TelnetParser {
    fn default() -> Self {
        Self {
            state: ParseState::Data,
            sub: Vec::new(),
        }
    }
}

impl TelnetParser {
    /// Create a parser in the data state
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; data goes to `out`, commands are returned in order
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> Vec<TelnetCommand> {
        let mut commands = Vec::new();
        for &b in input {
            self.state = match (self.state, b) {
                (ParseState::Data, IAC) => ParseState::Iac,
                (ParseState::Data, _) => {
                    out.push(b);
                    ParseState::Data
                }
                (ParseState::Iac, IAC) => {
                    out.push(IAC);
                    ParseState::Data
                }
                (ParseState::Iac, WILL | WONT | DO | DONT) => ParseState::Verb(b),
                (ParseState::Iac, SB) => {
                    self.sub.clear();
                    ParseState::Sub
                }
                (ParseState::Iac, BRK) => {
                    commands.push(TelnetCommand::Break);
                    ParseState::Data
                }
                (ParseState::Iac, _) => {
                    commands.push(TelnetCommand::Other(b));
                    ParseState::Data
                }
                (ParseState::Verb(verb), _) => {
                    commands.push(TelnetCommand::Negotiate { verb, option: b });
                    ParseState::Data
                }
                (ParseState::Sub, IAC) => ParseState::SubIac,
                (ParseState::Sub, _) => {
                    self.sub.push(b);
                    ParseState::Sub
                }
                (ParseState::SubIac, SE) => {
                    commands.push(TelnetCommand::Subnegotiation(std::mem::take(&mut self.sub)));
                    ParseState::Data
                }
                (ParseState::SubIac, _) => {
                    self.sub.push(b);
                    ParseState::Sub
                }
            };
        }
        commands
    }
}

/// Double every `IAC` byte in `data`
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 16);
    for &b in data {
        if b == IAC {
            out.push(IAC);
        }
        out.push(b);
    }
    out
}

/// Option negotiation bookkeeping
///
/// Both sides offer `WILL` and request `DO` for every enabled option up
/// front. A reply to one of our own requests settles it without an
/// answer; an unsolicited request is answered once.
#[derive(Debug, Default)]
struct Negotiator {
    supported: HashSet<u8>,
    awaiting: HashSet<(u8, u8)>,
    enabled_local: HashSet<u8>,
    enabled_remote: HashSet<u8>,
}

impl Negotiator {
    fn new(config: &TelnetConfig) -> Self {
        let mut supported = HashSet::new();
        if config.binary {
            supported.insert(OPT_BINARY);
        }
        if config.suppress_go_ahead {
            supported.insert(OPT_SGA);
        }
        Self {
            supported,
            ..Default::default()
        }
    }

    /// Initial offers; each is remembered until the peer answers
    fn offers(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut options: Vec<u8> = self.supported.iter().copied().collect();
        options.sort_unstable();
        for opt in options {
            for verb in [WILL, DO] {
                out.extend_from_slice(&[IAC, verb, opt]);
                self.awaiting.insert((verb, opt));
            }
        }
        out
    }

    fn is_settled(&self) -> bool {
        self.awaiting.is_empty()
    }

    /// Handle a negotiation command, returning any reply to send
    fn handle(&mut self, verb: u8, option: u8) -> Option<[u8; 3]> {
        let supported = self.supported.contains(&option);
        match verb {
            DO => {
                if self.awaiting.remove(&(WILL, option)) {
                    self.enabled_local.insert(option);
                    None
                } else if supported {
                    (!self.enabled_local.contains(&option)).then(|| {
                        self.enabled_local.insert(option);
                        [IAC, WILL, option]
                    })
                } else {
                    Some([IAC, WONT, option])
                }
            }
            WILL => {
                if self.awaiting.remove(&(DO, option)) {
                    self.enabled_remote.insert(option);
                    None
                } else if supported {
                    (!self.enabled_remote.contains(&option)).then(|| {
                        self.enabled_remote.insert(option);
                        [IAC, DO, option]
                    })
                } else {
                    Some([IAC, DONT, option])
                }
            }
            DONT => {
                self.awaiting.remove(&(WILL, option));
                self.enabled_local
                    .remove(&option)
                    .then_some([IAC, WONT, option])
            }
            WONT => {
                self.awaiting.remove(&(DO, option));
                self.enabled_remote
                    .remove(&option)
                    .then_some([IAC, DONT, option])
            }
            _ => None,
        }
    }
}

/// Telnet framing over an inner endpoint
pub struct TelnetEndpoint {
    inner: Endpoint,
    parser: TelnetParser,
    negotiator: Negotiator,
    decoded: Vec<u8>,
    raw: Vec<u8>,
    breaks: usize,
    name: String,
}

impl TelnetEndpoint {
    /// Wrap `inner` and run option negotiation, bounded by the connect timeout
    pub async fn negotiate(inner: Endpoint, config: &EndpointConfig) -> Result<Self> {
        let name = format!("telnet({})", inner.name());
        let mut ep = Self {
            inner,
            parser: TelnetParser::new(),
            negotiator: Negotiator::new(&config.telnet),
            decoded: Vec::new(),
            raw: vec![0u8; config.read_buffer_size],
            breaks: 0,
            name,
        };

        let wait = config.connect_timeout;
        let outcome = timeout(wait, ep.run_negotiation()).await;
        match outcome {
            Ok(Ok(())) => {
                debug!(endpoint = %ep.name, "telnet negotiation complete");
                Ok(ep)
            }
            Ok(Err(e)) => {
                ep.close_inner().await;
                Err(StreamError::Negotiation(e.to_string()))
            }
            Err(_) => {
                ep.close_inner().await;
                Err(StreamError::Negotiation(format!(
                    "no answer within {}ms",
                    wait.as_millis()
                )))
            }
        }
    }

    async fn close_inner(&mut self) {
        if let Err(e) = self.inner.close().await {
            warn!(endpoint = %self.name, error = %e, "close after failed negotiation failed");
        }
    }

    async fn run_negotiation(&mut self) -> Result<()> {
        let offers = self.negotiator.offers();
        if !offers.is_empty() {
            self.inner.write_all(&offers).await?;
        }
        while !self.negotiator.is_settled() {
            self.fill().await?;
        }
        Ok(())
    }

    /// Read once from the inner endpoint and process what arrived
    async fn fill(&mut self) -> Result<()> {
        let n = self.inner.read(&mut self.raw).await?;
        let commands = self.parser.feed(&self.raw[..n], &mut self.decoded);
        for cmd in commands {
            self.apply(cmd).await?;
        }
        Ok(())
    }

    async fn apply(&mut self, cmd: TelnetCommand) -> Result<()> {
        trace!(endpoint = %self.name, ?cmd, "telnet command");
        match cmd {
            TelnetCommand::Negotiate { verb, option } => {
                if let Some(reply) = self.negotiator.handle(verb, option) {
                    self.inner.write_all(&reply).await?;
                }
            }
            TelnetCommand::Break => {
                self.breaks += 1;
                debug!(endpoint = %self.name, "break received");
            }
            TelnetCommand::Subnegotiation(_) | TelnetCommand::Other(_) => {}
        }
        Ok(())
    }
}

#[async_trait]
impl StreamEndpoint for TelnetEndpoint {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        while self.decoded.is_empty() {
            self.fill().await?;
        }
        let n = self.decoded.len().min(buf.len());
        buf[..n].copy_from_slice(&self.decoded[..n]);
        self.decoded.drain(..n);
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.inner.write_all(&escape(data)).await?;
        Ok(data.len())
    }

    async fn control(&mut self, req: &ControlRequest) -> Result<String> {
        match (req.depth, req.option) {
            (depth, ControlOption::SendBreak) if depth.targets_here() => {
                self.inner.write_all(&[IAC, BRK]).await?;
                Ok(String::new())
            }
            (depth, ControlOption::BreaksReceived) if depth.targets_here() && req.get => {
                Ok(self.breaks.to_string())
            }
            (ControlDepth::Layer(0), _) => Err(req.option.unsupported()),
            _ => match req.descend() {
                Some(lower) => self.inner.control_request(&lower).await,
                None => Err(req.option.unsupported()),
            },
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Telnet framing over an inner acceptor
pub struct TelnetAcceptor {
    inner: Acceptor,
    descriptor: Descriptor,
    config: EndpointConfig,
}

impl TelnetAcceptor {
    /// Layer Telnet over an opened acceptor
    pub fn new(inner: Acceptor, descriptor: &Descriptor, config: &EndpointConfig) -> Self {
        Self {
            inner,
            descriptor: descriptor.clone(),
            config: config.clone(),
        }
    }
}

#[async_trait]
impl StreamAcceptor for TelnetAcceptor {
    async fn accept(&mut self) -> Result<Endpoint> {
        let ep = self.inner.accept().await?;
        Ok(Endpoint::new(TelnetEndpoint::negotiate(ep, &self.config).await?))
    }

    async fn connect_from(&mut self, target: &Descriptor) -> Result<Endpoint> {
        let lower = target.inner().ok_or_else(|| {
            StreamError::invalid_descriptor(target.to_string(), "expected a telnet descriptor")
        })?;
        let ep = self.inner.connect_from(&lower).await?;
        Ok(Endpoint::new(TelnetEndpoint::negotiate(ep, &self.config).await?))
    }

    fn local_addrs(&self) -> Vec<SocketAddr> {
        self.inner.local_addrs()
    }

    fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::tests::ScriptedEndpoint;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_parser_strips_commands() {
        let mut p = TelnetParser::new();
        let mut out = Vec::new();
        let cmds = p.feed(&[b'a', IAC, WILL, OPT_SGA, b'b', IAC, IAC, b'c'], &mut out);
        assert_eq!(out, vec![b'a', b'b', IAC, b'c']);
        assert_eq!(
            cmds,
            vec![TelnetCommand::Negotiate {
                verb: WILL,
                option: OPT_SGA
            }]
        );
    }

    #[test]
    fn test_parser_split_command() {
        let mut p = TelnetParser::new();
        let mut out = Vec::new();
        assert!(p.feed(&[b'x', IAC], &mut out).is_empty());
        assert!(p.feed(&[DO], &mut out).is_empty());
        let cmds = p.feed(&[OPT_BINARY, b'y'], &mut out);
        assert_eq!(out, b"xy");
        assert_eq!(
            cmds,
            vec![TelnetCommand::Negotiate {
                verb: DO,
                option: OPT_BINARY
            }]
        );
    }

    #[test]
    fn test_parser_subnegotiation_and_break() {
        let mut p = TelnetParser::new();
        let mut out = Vec::new();
        let cmds = p.feed(&[IAC, SB, 24, 1, IAC, IAC, IAC, SE, IAC, BRK], &mut out);
        assert!(out.is_empty());
        assert_eq!(
            cmds,
            vec![
                TelnetCommand::Subnegotiation(vec![24, 1, IAC]),
                TelnetCommand::Break
            ]
        );
    }

    #[test]
    fn test_escape_doubles_iac() {
        assert_eq!(escape(&[1, IAC, 2]), vec![1, IAC, IAC, 2]);
        assert_eq!(escape(b"plain"), b"plain".to_vec());
    }

    #[test]
    fn test_negotiator_settles_on_replies() {
        let mut n = Negotiator::new(&TelnetConfig::default());
        let offers = n.offers();
        assert_eq!(offers.len(), 12);
        assert!(!n.is_settled());

        for opt in [OPT_BINARY, OPT_SGA] {
            assert_eq!(n.handle(WILL, opt), None);
            assert_eq!(n.handle(DO, opt), None);
        }
        assert!(n.is_settled());
    }

    #[test]
    fn test_negotiator_refuses_unknown_option() {
        let mut n = Negotiator::new(&TelnetConfig::default());
        assert_eq!(n.handle(DO, 31), Some([IAC, WONT, 31]));
        assert_eq!(n.handle(WILL, 31), Some([IAC, DONT, 31]));
    }

    #[test]
    fn test_negotiator_answers_unsolicited_once() {
        let mut n = Negotiator::new(&TelnetConfig::default());
        assert_eq!(n.handle(DO, OPT_SGA), Some([IAC, WILL, OPT_SGA]));
        assert_eq!(n.handle(DO, OPT_SGA), None);
        assert_eq!(n.handle(DONT, OPT_SGA), Some([IAC, WONT, OPT_SGA]));
    }

    #[tokio::test]
    async fn test_negotiate_over_scripted_peer() {
        let peer_offers = vec![
            IAC, WILL, OPT_BINARY, IAC, DO, OPT_BINARY, IAC, WILL, OPT_SGA, IAC, DO, OPT_SGA, b'h',
            b'i',
        ];
        let inner = Endpoint::new(ScriptedEndpoint {
            reads: VecDeque::from(vec![peer_offers]),
            ..Default::default()
        });
        let mut ep = TelnetEndpoint::negotiate(inner, &EndpointConfig::default())
            .await
            .unwrap();

        let mut buf = [0u8; 8];
        let n = ep.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");
    }

    #[tokio::test]
    async fn test_negotiate_fails_when_peer_goes_away() {
        let inner = Endpoint::new(ScriptedEndpoint::default());
        let err = TelnetEndpoint::negotiate(inner, &EndpointConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::Negotiation(_)));
    }

    #[tokio::test]
    async fn test_failed_negotiation_closes_inner_despite_close_error() {
        let closes = Arc::new(AtomicUsize::new(0));
        let inner = Endpoint::new(ScriptedEndpoint {
            hold_open: true,
            fail_close: true,
            closes: closes.clone(),
            ..Default::default()
        });
        let config = EndpointConfig {
            connect_timeout: Duration::from_millis(20),
            ..EndpointConfig::default()
        };
        let err = TelnetEndpoint::negotiate(inner, &config).await.err().unwrap();
        assert!(matches!(err, StreamError::Negotiation(ref m) if m.contains("20ms")));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_control_descends_to_inner() {
        let inner = Endpoint::new(ScriptedEndpoint {
            reads: VecDeque::from(vec![vec![
                IAC, WILL, OPT_BINARY, IAC, DO, OPT_BINARY, IAC, WILL, OPT_SGA, IAC, DO, OPT_SGA,
            ]]),
            ..Default::default()
        });
        let mut ep = TelnetEndpoint::negotiate(inner, &EndpointConfig::default())
            .await
            .unwrap();

        // the scripted endpoint rejects every control, so the request reached it
        let err = ep
            .control(&ControlRequest::get(1, ControlOption::Streams))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::NotSupported(_)));

        let err = ep
            .control(&ControlRequest::get(0, ControlOption::Streams))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::NotSupported(_)));

        ep.control(&ControlRequest::set(0, ControlOption::SendBreak, ""))
            .await
            .unwrap();
    }
}
