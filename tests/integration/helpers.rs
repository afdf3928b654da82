//! Test helpers: an in-process server over a temporary site root.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use tempfile::TempDir;

use tokio_mvc::config::{AppConfig, MiddlewareConfig, ServerConfig};
use tokio_mvc::{app, middleware, Server};

/// A running server bound to an ephemeral port.
pub struct TestServer {
    pub base_url: String,
    pub client: Client,
    pub root: TempDir,
    server: Arc<Server>,
}

#[allow(dead_code)]
impl TestServer {
    /// Server over the default fixture site.
    pub async fn start() -> Self {
        Self::start_with(MiddlewareConfig::default(), |_| {}).await
    }

    /// Server over the default fixture site, customised by `setup`.
    pub async fn start_with(middleware: MiddlewareConfig, setup: impl FnOnce(&Path)) -> Self {
        let root = TempDir::new().expect("Failed to create site root");
        write_site(root.path());
        setup(root.path());

        let dispatcher =
            app::build(&AppConfig::with_root(root.path())).expect("Failed to build application");
        let config = ServerConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            ..ServerConfig::default()
        };
        let server = Arc::new(
            Server::bind(config, dispatcher, middleware::from_config(&middleware))
                .expect("Failed to bind server"),
        );

        let running = Arc::clone(&server);
        tokio::spawn(async move {
            running.run().await.expect("Server failed");
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: format!("http://{}", server.local_addr()),
            client,
            root,
            server,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("GET request failed")
    }

    pub async fn get_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> Response {
        let mut req = self.client.get(self.url(path));
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        req.send().await.expect("GET request failed")
    }

    /// Fetch a CSRF token; returns `(token, "sid=...")`.
    pub async fn csrf(&self) -> (String, String) {
        let resp = self.get("/csrf-token").await;
        assert_status(&resp, StatusCode::OK);
        let cookie = resp
            .headers()
            .get("set-cookie")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .expect("session cookie")
            .to_string();
        let body: serde_json::Value = resp.json().await.expect("token body");
        let token = body["token"].as_str().expect("token").to_string();
        (token, cookie)
    }

    /// Send `method` with a JSON body and a valid CSRF token.
    pub async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        json: &serde_json::Value,
    ) -> Response {
        let (token, cookie) = self.csrf().await;
        self.client
            .request(method, self.url(path))
            .header("x-csrf-token", token)
            .header("cookie", cookie)
            .json(json)
            .send()
            .await
            .expect("request failed")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.trigger_shutdown();
    }
}

/// Fixture site: a home page, assets, a data tree and a `note` model.
pub fn write_site(root: &Path) {
    fs::create_dir_all(root.join("pub/docs")).unwrap();
    fs::create_dir_all(root.join("dat/model")).unwrap();
    fs::write(root.join("pub/index.html"), "<h1>home</h1>").unwrap();
    fs::write(root.join("pub/about.html"), "<h1>about</h1>").unwrap();
    fs::write(root.join("pub/docs/index.html"), "<h1>docs</h1>").unwrap();
    fs::write(root.join("pub/style.css"), "body { margin: 0 }").unwrap();
    fs::write(
        root.join("dat/team.json"),
        r#"{"members": [{"name": "Ann", "role": "dev"}, {"name": "Bob", "role": "ops"}]}"#,
    )
    .unwrap();
    fs::write(
        root.join("dat/model/note.json"),
        r#"{
            "text": {"type": "string", "required": true},
            "stars": {"type": "int", "default": 0}
        }"#,
    )
    .unwrap();
}

pub fn assert_status(response: &Response, expected: StatusCode) {
    assert_eq!(
        response.status(),
        expected,
        "Expected status {}, got {}",
        expected,
        response.status()
    );
}

pub fn assert_header(response: &Response, name: &str, expected: &str) {
    let value = response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("Header '{}' not found", name))
        .to_str()
        .unwrap();
    assert_eq!(value, expected, "Header '{}' mismatch", name);
}

pub fn assert_header_starts_with(response: &Response, name: &str, prefix: &str) {
    let value = response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("Header '{}' not found", name))
        .to_str()
        .unwrap();
    assert!(
        value.starts_with(prefix),
        "Header '{}' expected to start with '{}', got '{}'",
        name,
        prefix,
        value
    );
}

pub fn assert_has_header(response: &Response, name: &str) {
    assert!(
        response.headers().contains_key(name),
        "Header '{}' not found",
        name
    );
}

pub async fn assert_body_contains(response: Response, substring: &str) {
    let body = response.text().await.expect("Failed to read body");
    assert!(
        body.contains(substring),
        "Body does not contain '{}'. Body: {}",
        substring,
        &body[..body.len().min(500)]
    );
}
