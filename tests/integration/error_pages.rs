//! Error pages rendered by the error controller.

use crate::helpers::*;
use reqwest::StatusCode;

#[tokio::test]
async fn test_builtin_404_page() {
    let server = TestServer::start().await;
    let resp = server.get("/nowhere/at/all").await;

    assert_status(&resp, StatusCode::NOT_FOUND);
    assert_header_starts_with(&resp, "content-type", "text/html");
    assert_body_contains(resp, "Error 404").await;
}

#[tokio::test]
async fn test_custom_error_template() {
    let server = TestServer::start_with(Default::default(), |root| {
        std::fs::create_dir_all(root.join("tpl")).unwrap();
        std::fs::write(
            root.join("tpl/error.mustache"),
            "<p>custom {{status}}: {{message}}</p>",
        )
        .unwrap();
        std::fs::create_dir_all(root.join("cnf")).unwrap();
        std::fs::write(
            root.join("cnf/site.toml"),
            "hosts = \"*\"\n[status]\n404 = \"Nothing here\"\n",
        )
        .unwrap();
    })
    .await;

    let resp = server.get("/missing").await;
    assert_status(&resp, StatusCode::NOT_FOUND);
    assert_body_contains(resp, "<p>custom 404: Nothing here</p>").await;
}

#[tokio::test]
async fn test_error_pages_are_not_cached() {
    let server = TestServer::start().await;
    let resp = server.get("/later.html").await;
    assert_status(&resp, StatusCode::NOT_FOUND);

    std::fs::write(server.root.path().join("pub/later.html"), "<p>now</p>").unwrap();
    let resp = server.get("/later.html").await;
    assert_status(&resp, StatusCode::OK);
}
