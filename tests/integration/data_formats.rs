//! Data tree responses and content negotiation.

use crate::helpers::*;
use reqwest::StatusCode;

#[tokio::test]
async fn test_json_by_extension() {
    let server = TestServer::start().await;
    let resp = server.get("/team/members.json").await;

    assert_status(&resp, StatusCode::OK);
    assert_header_starts_with(&resp, "content-type", "application/json");
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body[1]["name"], "Bob");
}

#[tokio::test]
async fn test_csv_by_extension() {
    let server = TestServer::start().await;
    let resp = server.get("/team/members.csv").await;

    assert_status(&resp, StatusCode::OK);
    assert_header_starts_with(&resp, "content-type", "text/csv");
    assert_body_contains(resp, "name,role\r\nAnn,dev\r\n").await;
}

#[tokio::test]
async fn test_xml_by_extension() {
    let server = TestServer::start().await;
    let resp = server.get("/team/members.xml").await;

    assert_status(&resp, StatusCode::OK);
    assert_body_contains(resp, "<field name=\"name\">Ann</field>").await;
}

#[tokio::test]
async fn test_missing_node() {
    let server = TestServer::start().await;
    let resp = server.get("/team/nobody.json").await;

    assert_status(&resp, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_data_tree_reloads() {
    let server = TestServer::start().await;
    let resp = server.get("/team/members.json").await;
    assert_status(&resp, StatusCode::OK);

    std::fs::write(
        server.root.path().join("dat/extra.json"),
        r#"{"items": [{"id": 1}]}"#,
    )
    .unwrap();
    // Push the mtime past the loaded snapshot.
    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
    std::fs::File::options()
        .write(true)
        .open(server.root.path().join("dat/extra.json"))
        .unwrap()
        .set_modified(later)
        .unwrap();

    let resp = server.get("/extra/items.json").await;
    assert_status(&resp, StatusCode::OK);
}
