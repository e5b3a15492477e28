//! Telnet stacks driven from a connecting acceptor

mod helpers;

use streamio_core::ControlOption;
use streamio_harness::{assert_control, SmallTransfer, TestAcceptConnect};

#[tokio::test]
async fn test_telnet_sctp_accept_connect() {
    if !helpers::sctp_or_skip("test_telnet_sctp_accept_connect") {
        return;
    }
    let ctx = helpers::context();
    let mut pair = TestAcceptConnect::new_in(
        &ctx,
        "telnet,sctp,0",
        "telnet,sctp,0",
        "telnet,sctp,localhost,",
        SmallTransfer::default(),
    )
    .unwrap()
    .do_close(false)
    .run()
    .await
    .unwrap();

    // the sctp layer sits under telnet
    assert_control(&mut pair.io2, 1, ControlOption::Streams, "instreams=1,ostreams=1")
        .await
        .unwrap();
    pair.close().await.unwrap();
}

#[tokio::test]
async fn test_telnet_tcp_accept_connect() {
    let ctx = helpers::context();
    TestAcceptConnect::new_in(
        &ctx,
        "telnet,tcp,0",
        "telnet,tcp,0",
        "telnet,tcp,localhost,",
        SmallTransfer::default(),
    )
    .unwrap()
    .run()
    .await
    .unwrap();
}

#[tokio::test]
async fn test_mismatched_stack_is_rejected() {
    let ctx = helpers::context();
    let err = TestAcceptConnect::new_in(
        &ctx,
        "tcp,0",
        "telnet,tcp,0",
        "tcp,localhost,",
        SmallTransfer::default(),
    )
    .unwrap()
    .run()
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_DESCRIPTOR");
}
