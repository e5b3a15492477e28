//! TCP accept harness runs

mod helpers;

use streamio_core::ControlOption;
use streamio_harness::{
    assert_addr, assert_control, DataTransfer, HarnessError, HarnessState, RandomTransfer, TestAccept,
};

#[tokio::test]
async fn test_accept_tcp_data() {
    let ctx = helpers::context();
    let pair = TestAccept::new_in(&ctx, "tcp,localhost,", "tcp,0", DataTransfer::default())
        .unwrap()
        .expected_raddr("ipv4,127.0.0.1,")
        .run()
        .await
        .unwrap();
    assert_eq!(pair.state(), HarnessState::Closed);
}

#[tokio::test]
async fn test_accept_tcp_random() {
    let ctx = helpers::context();
    TestAccept::new_in(&ctx, "tcp,127.0.0.1,", "tcp,127.0.0.1,0", RandomTransfer::with_size(100_000))
        .unwrap()
        .chunk_size(1000)
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_open_pair_and_double_close() {
    let ctx = helpers::context();
    let mut pair = TestAccept::new_in(&ctx, "tcp,127.0.0.1,", "tcp,127.0.0.1,0", DataTransfer::default())
        .unwrap()
        .do_close(false)
        .run()
        .await
        .unwrap();
    assert_eq!(pair.state(), HarnessState::Asserting);

    let port = pair.port();
    assert_addr(&mut pair.io2, 0, ControlOption::LocalAddr, "ipv4,127.0.0.1,", port)
        .await
        .unwrap();
    assert_control(&mut pair.acceptor, 0, ControlOption::LocalPort, &port.to_string())
        .await
        .unwrap();

    pair.close().await.unwrap();
    pair.close().await.unwrap();
    assert_eq!(pair.state(), HarnessState::Closed);
    assert!(!pair.io1.is_open());
    assert!(!pair.acceptor.is_open());
}

#[tokio::test]
async fn test_wrong_address_expectation_fails() {
    let ctx = helpers::context();
    let err = TestAccept::new_in(&ctx, "tcp,127.0.0.1,", "tcp,127.0.0.1,0", DataTransfer::default())
        .unwrap()
        .expected_raddr("ipv6,::1,")
        .run()
        .await
        .unwrap_err();
    match err {
        HarnessError::Mismatch(m) => assert!(m.expected.starts_with("ipv6,::1,")),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_accept_that_never_arrives_times_out() {
    let ctx = helpers::context();
    // a fixed udp port is never filled in, so the tcp acceptor sees nothing
    let err = TestAccept::new_in(&ctx, "udp,127.0.0.1,9", "tcp,127.0.0.1,0", DataTransfer::default())
        .unwrap()
        .timeout(std::time::Duration::from_millis(300))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::Timeout { stage: "connect", .. }));
}
