//! REST model endpoints and CSRF protection.

use crate::helpers::*;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

#[tokio::test]
async fn test_post_requires_csrf_token() {
    let server = TestServer::start().await;
    let resp = server
        .client
        .post(server.url("/api/note"))
        .json(&json!({"text": "hello"}))
        .send()
        .await
        .unwrap();

    assert_status(&resp, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_create_read_update_delete() {
    let server = TestServer::start().await;

    let resp = server
        .send_json(Method::POST, "/api/note.json", &json!({"text": "first"}))
        .await;
    assert_status(&resp, StatusCode::OK);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["text"], "first");
    assert_eq!(created["stars"], 0);
    let uid = created["uid"].as_u64().expect("uid");

    let resp = server.get(&format!("/api/note/{}.json", uid)).await;
    assert_status(&resp, StatusCode::OK);
    let read: Value = resp.json().await.unwrap();
    assert_eq!(read["text"], "first");

    let resp = server
        .send_json(
            Method::PUT,
            &format!("/api/note/{}.json", uid),
            &json!({"stars": 5}),
        )
        .await;
    assert_status(&resp, StatusCode::OK);

    let read: Value = server
        .get(&format!("/api/note/{}.json", uid))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(read["stars"], 5);
    assert_eq!(read["text"], "first");

    let resp = server
        .send_json(Method::DELETE, &format!("/api/note/{}", uid), &Value::Null)
        .await;
    assert_status(&resp, StatusCode::OK);

    let resp = server.get(&format!("/api/note/{}.json", uid)).await;
    assert_status(&resp, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_count_and_filters() {
    let server = TestServer::start().await;
    let resp = server
        .send_json(
            Method::POST,
            "/api/note.json",
            &json!([{"text": "a", "stars": 1}, {"text": "b", "stars": 3}, {"text": "c", "stars": 3}]),
        )
        .await;
    assert_status(&resp, StatusCode::OK);

    let count: Value = server
        .get("/api/note.json?count")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(count["count"], 3);

    let list: Value = server
        .get("/api/note.json?conditions%5B%5D=stars::3&order=text&sort=desc")
        .await
        .json()
        .await
        .unwrap();
    let texts: Vec<&str> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, vec!["c", "b"]);

    let resp = server.get("/api/note.csv?limit=1").await;
    assert_status(&resp, StatusCode::OK);
    assert_header_starts_with(&resp, "content-type", "text/csv");
}

#[tokio::test]
async fn test_validation_and_unknown_type() {
    let server = TestServer::start().await;

    let resp = server
        .send_json(Method::POST, "/api/note.json", &json!({"stars": 2}))
        .await;
    assert!(resp.status().is_client_error(), "got {}", resp.status());

    let resp = server.get("/api/ghost.json").await;
    assert_status(&resp, StatusCode::NOT_FOUND);
}
