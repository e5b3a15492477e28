//! Urgent data over TCP

mod helpers;

use streamio_harness::{TestAccept, UrgentTransfer};

#[tokio::test]
async fn test_tcp_urgent() {
    let ctx = helpers::context();
    TestAccept::new_in(&ctx, "tcp,localhost,", "tcp,0", UrgentTransfer::default())
        .unwrap()
        .chunk_size(64)
        .run()
        .await
        .unwrap();
}
