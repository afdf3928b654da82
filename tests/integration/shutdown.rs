//! Graceful shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::helpers::*;
use reqwest::StatusCode;
use tokio_mvc::broker::topics;

#[tokio::test]
async fn test_shutdown_publishes_and_drains() {
    let server = TestServer::start().await;
    assert_status(&server.get("/").await, StatusCode::OK);

    let published = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&published);
    server
        .server()
        .dispatcher()
        .broker()
        .subscribe(topics::SHUTDOWN, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    server.server().trigger_shutdown();
    server.server().trigger_shutdown();
    assert_eq!(published.load(Ordering::SeqCst), 1);

    assert!(server.server().wait_for_drain(Duration::from_secs(5)).await);
    assert_eq!(server.server().active_connections(), 0);
}
