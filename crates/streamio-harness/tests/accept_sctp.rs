//! SCTP accept harness runs

mod helpers;

use streamio_core::ControlOption;
use streamio_harness::{assert_control, DataTransfer, SmallTransfer, TestAccept};

#[tokio::test]
async fn test_accept_sctp() {
    if !helpers::sctp_or_skip("test_accept_sctp") {
        return;
    }
    let ctx = helpers::context();
    let mut pair = TestAccept::new_in(&ctx, "sctp,localhost,", "sctp,0", DataTransfer::default())
        .unwrap()
        .do_close(false)
        .run()
        .await
        .unwrap();

    assert_control(&mut pair.io1, 0, ControlOption::Streams, "instreams=1,ostreams=1")
        .await
        .unwrap();
    pair.close().await.unwrap();
}

#[tokio::test]
async fn test_sctp_small() {
    if !helpers::sctp_or_skip("test_sctp_small") {
        return;
    }
    let ctx = helpers::context();
    TestAccept::new_in(&ctx, "sctp,localhost,", "sctp,0", SmallTransfer::default())
        .unwrap()
        .chunk_size(64)
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn test_sctp_acceptor_reports_bound_address() {
    if !helpers::sctp_or_skip("test_sctp_acceptor_reports_bound_address") {
        return;
    }
    let ctx = helpers::context();
    TestAccept::new_in(&ctx, "sctp,127.0.0.1,", "sctp,127.0.0.1,0", DataTransfer::default())
        .unwrap()
        .expected_raddr("ipv4,127.0.0.1,")
        .expected_acc_laddr("ipv4,127.0.0.1,")
        .run()
        .await
        .unwrap();
}
