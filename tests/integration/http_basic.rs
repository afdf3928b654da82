//! Basic HTTP tests: pages, files, HEAD, caching headers.

use crate::helpers::*;
use reqwest::StatusCode;

#[tokio::test]
async fn test_get_index() {
    let server = TestServer::start().await;
    let resp = server.get("/").await;

    assert_status(&resp, StatusCode::OK);
    assert_header_starts_with(&resp, "content-type", "text/html");
    assert_header(&resp, "x-content-type-options", "nosniff");
    assert_body_contains(resp, "<h1>home</h1>").await;
}

#[tokio::test]
async fn test_html_candidates() {
    let server = TestServer::start().await;

    let resp = server.get("/about").await;
    assert_status(&resp, StatusCode::OK);
    assert_body_contains(resp, "about").await;

    let resp = server.get("/docs").await;
    assert_status(&resp, StatusCode::OK);
    assert_body_contains(resp, "docs").await;
}

#[tokio::test]
async fn test_static_file() {
    let server = TestServer::start().await;
    let resp = server.get("/style.css").await;

    assert_status(&resp, StatusCode::OK);
    assert_header_starts_with(&resp, "content-type", "text/css");
    assert_has_header(&resp, "etag");
    assert_has_header(&resp, "expires");
    assert_body_contains(resp, "margin").await;
}

#[tokio::test]
async fn test_head_request() {
    let server = TestServer::start().await;
    let resp = server
        .client
        .head(server.url("/"))
        .send()
        .await
        .expect("HEAD request failed");

    assert_status(&resp, StatusCode::OK);
    assert_header(&resp, "content-length", "13");
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_conditional_get() {
    let server = TestServer::start().await;
    let resp = server.get("/style.css").await;
    let etag = resp
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .expect("etag")
        .to_string();

    let resp = server
        .get_with_headers("/style.css", &[("if-none-match", &etag)])
        .await;
    assert_status(&resp, StatusCode::NOT_MODIFIED);
}

#[tokio::test]
async fn test_request_id_echoed() {
    let server = TestServer::start().await;
    let resp = server
        .get_with_headers("/missing-page", &[("x-request-id", "it-rid-1")])
        .await;

    assert_status(&resp, StatusCode::NOT_FOUND);
    assert_body_contains(resp, "it-rid-1").await;
}

#[tokio::test]
async fn test_unrouted_method() {
    let server = TestServer::start().await;
    let resp = server
        .client
        .request(reqwest::Method::OPTIONS, server.url("/"))
        .send()
        .await
        .expect("OPTIONS request failed");

    assert_status(&resp, StatusCode::NOT_IMPLEMENTED);
}
