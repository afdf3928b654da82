//! Rate limiting middleware over the real server.

use crate::helpers::*;
use reqwest::StatusCode;
use tokio_mvc::config::MiddlewareConfig;

fn limited(limit: u64) -> MiddlewareConfig {
    MiddlewareConfig {
        rate_limit: Some(limit),
        rate_window: 60,
        access_log: true,
    }
}

#[tokio::test]
async fn test_rate_limit_headers_present() {
    let server = TestServer::start_with(limited(10), |_| {}).await;
    let resp = server.get("/").await;

    assert_status(&resp, StatusCode::OK);
    assert_header(&resp, "x-ratelimit-limit", "10");
    assert_header(&resp, "x-ratelimit-remaining", "9");
    assert_has_header(&resp, "x-ratelimit-reset");
}

#[tokio::test]
async fn test_rate_limit_exceeded() {
    let server = TestServer::start_with(limited(3), |_| {}).await;

    for _ in 0..3 {
        assert_status(&server.get("/").await, StatusCode::OK);
    }

    let resp = server.get("/").await;
    assert_status(&resp, StatusCode::TOO_MANY_REQUESTS);
    assert_has_header(&resp, "retry-after");
    assert_header(&resp, "x-ratelimit-remaining", "0");
}

#[tokio::test]
async fn test_no_headers_without_rate_limit() {
    let server = TestServer::start().await;
    let resp = server.get("/").await;

    assert!(!resp.headers().contains_key("x-ratelimit-limit"));
}
