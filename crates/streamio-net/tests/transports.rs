//! Endpoint pairs over loopback
//!
//! Each test opens an acceptor, connects to it, and checks that the two
//! ends can talk and answer control queries.

use std::time::Duration;
use tokio::time::timeout;

use streamio_core::{ControlDepth, ControlOption, Descriptor, EndpointConfig, StreamError};
use streamio_net::{connect, open_acceptor, sctp_supported, Endpoint, Relay, RelayExit};

const WAIT: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("streamio_net=debug")
        .with_test_writer()
        .try_init();
}

async fn pair(accept: &str, target: &str) -> (Endpoint, Endpoint) {
    let config = EndpointConfig::default();
    let mut acceptor = open_acceptor(&accept.parse().unwrap(), &config)
        .await
        .unwrap();
    let target: Descriptor = target.parse().unwrap();
    let target = target.with_port(acceptor.port().unwrap());

    let (client, server) = timeout(WAIT, async {
        tokio::join!(connect(&target, &config), acceptor.accept())
    })
    .await
    .expect("pair setup timed out");
    acceptor.close().await.unwrap();
    (client.unwrap(), server.unwrap())
}

async fn roundtrip(a: &mut Endpoint, b: &mut Endpoint, payload: &[u8]) {
    a.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    timeout(WAIT, b.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(buf, payload);
}

#[tokio::test]
async fn test_tcp_pair_exchanges_data() {
    init_tracing();
    let (mut client, mut server) = pair("tcp,127.0.0.1,0", "tcp,127.0.0.1,").await;

    roundtrip(&mut client, &mut server, b"from client").await;
    roundtrip(&mut server, &mut client, b"from server").await;

    let raddr = client
        .control(0, true, ControlOption::RemoteAddr, None)
        .await
        .unwrap();
    assert!(raddr.starts_with("ipv4,127.0.0.1,"));

    client.close().await.unwrap();
    let mut buf = [0u8; 1];
    let err = timeout(WAIT, server.read(&mut buf)).await.unwrap().unwrap_err();
    assert!(matches!(err, StreamError::RemoteClosed));
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_telnet_over_tcp_escapes_iac() {
    init_tracing();
    let (mut client, mut server) =
        pair("telnet,tcp,127.0.0.1,0", "telnet,tcp,127.0.0.1,").await;

    let payload = [0u8, 255, 1, 255, 255, 2];
    roundtrip(&mut client, &mut server, &payload).await;
    roundtrip(&mut server, &mut client, &payload).await;

    // depth 1 is the tcp layer under telnet
    let laddr = client
        .control(1, true, ControlOption::LocalAddr, None)
        .await
        .unwrap();
    assert!(laddr.starts_with("ipv4,127.0.0.1,"));

    let err = client
        .control(0, true, ControlOption::LocalAddr, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::NotSupported(_)));

    client
        .control(ControlDepth::First, false, ControlOption::SendBreak, None)
        .await
        .unwrap();
    roundtrip(&mut client, &mut server, b"after break").await;

    let breaks = server
        .control(0, true, ControlOption::BreaksReceived, None)
        .await
        .unwrap();
    assert_eq!(breaks, "1");
    let breaks = client
        .control(ControlDepth::First, true, ControlOption::BreaksReceived, None)
        .await
        .unwrap();
    assert_eq!(breaks, "0");

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_udp_acceptor_separates_peers() {
    init_tracing();
    let config = EndpointConfig::default();
    let mut acceptor = open_acceptor(&"udp,127.0.0.1,0".parse().unwrap(), &config)
        .await
        .unwrap();
    let target: Descriptor = "udp,127.0.0.1,".parse().unwrap();
    let target = target.with_port(acceptor.port().unwrap());

    let mut first = connect(&target, &config).await.unwrap();
    let mut second = connect(&target, &config).await.unwrap();

    first.write_all(b"1").await.unwrap();
    let mut s1 = timeout(WAIT, acceptor.accept()).await.unwrap().unwrap();
    second.write_all(b"2").await.unwrap();
    let mut s2 = timeout(WAIT, acceptor.accept()).await.unwrap().unwrap();

    let mut buf = [0u8; 1];
    s1.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"1");
    s2.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"2");

    roundtrip(&mut s2, &mut second, b"to second").await;
    roundtrip(&mut s1, &mut first, b"to first").await;

    for ep in [&mut first, &mut second, &mut s1, &mut s2] {
        ep.close().await.unwrap();
    }
    acceptor.close().await.unwrap();
    assert!(matches!(acceptor.accept().await, Err(StreamError::Closed)));
}

#[tokio::test]
async fn test_udp_peer_survives_acceptor_close() {
    init_tracing();
    let config = EndpointConfig::default();
    let mut acceptor = open_acceptor(&"udp,127.0.0.1,0".parse().unwrap(), &config)
        .await
        .unwrap();
    let target: Descriptor = "udp,127.0.0.1,".parse().unwrap();
    let target = target.with_port(acceptor.port().unwrap());

    let mut client = connect(&target, &config).await.unwrap();
    client.write_all(b"A").await.unwrap();
    let mut server = timeout(WAIT, acceptor.accept()).await.unwrap().unwrap();
    acceptor.close().await.unwrap();

    let mut buf = [0u8; 1];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"A");

    roundtrip(&mut client, &mut server, b"B").await;
    roundtrip(&mut server, &mut client, b"reply").await;

    // a new peer is not admitted once the acceptor is closed
    let mut late = connect(&target, &config).await.unwrap();
    late.write_all(b"late").await.unwrap();
    roundtrip(&mut client, &mut server, b"still routed").await;
    assert!(matches!(acceptor.accept().await, Err(StreamError::Closed)));

    for ep in [&mut late, &mut client, &mut server] {
        ep.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_sctp_pair_reports_streams() {
    init_tracing();
    if !sctp_supported() {
        eprintln!("sctp not available, skipping");
        return;
    }
    let (mut client, mut server) = pair("sctp,127.0.0.1,0", "sctp,127.0.0.1,").await;
    roundtrip(&mut client, &mut server, b"sctp data").await;

    let streams = client
        .control(0, true, ControlOption::Streams, None)
        .await
        .unwrap();
    assert_eq!(streams, "instreams=1,ostreams=1");

    client.close().await.unwrap();
    server.close().await.unwrap();
}

#[tokio::test]
async fn test_relay_bridges_two_connections() {
    init_tracing();
    let (mut user, mut local) = pair("tcp,127.0.0.1,0", "tcp,127.0.0.1,").await;
    let (mut remote, mut far) = pair("tcp,127.0.0.1,0", "tcp,127.0.0.1,").await;

    let relay = tokio::spawn(async move {
        let exit = Relay::new()
            .with_escape_char(0x1d)
            .run(&mut local, &mut remote)
            .await;
        local.close().await.unwrap();
        remote.close().await.unwrap();
        exit
    });

    roundtrip(&mut user, &mut far, b"through the relay").await;
    roundtrip(&mut far, &mut user, b"and back").await;

    user.write_all(&[0x1d, b'q']).await.unwrap();
    let exit = timeout(WAIT, relay).await.unwrap().unwrap().unwrap();
    assert_eq!(exit, RelayExit::Quit);

    user.close().await.unwrap();
    far.close().await.unwrap();
}

#[tokio::test]
async fn test_relay_escape_sends_break_to_far_side() {
    init_tracing();
    let (mut user, mut local) = pair("tcp,127.0.0.1,0", "tcp,127.0.0.1,").await;
    let (mut remote, mut far) =
        pair("telnet,tcp,127.0.0.1,0", "telnet,tcp,127.0.0.1,").await;

    let relay = tokio::spawn(async move {
        let exit = Relay::new()
            .with_escape_char(0x1d)
            .run(&mut local, &mut remote)
            .await;
        local.close().await.unwrap();
        remote.close().await.unwrap();
        exit
    });

    user.write_all(&[0x1d, b'b']).await.unwrap();
    roundtrip(&mut user, &mut far, b"x").await;
    let breaks = far
        .control(0, true, ControlOption::BreaksReceived, None)
        .await
        .unwrap();
    assert_eq!(breaks, "1");

    user.write_all(&[0x1d, b'q']).await.unwrap();
    let exit = timeout(WAIT, relay).await.unwrap().unwrap().unwrap();
    assert_eq!(exit, RelayExit::Quit);

    user.close().await.unwrap();
    far.close().await.unwrap();
}
