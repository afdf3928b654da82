//! HTTP request abstraction for middleware and the dispatcher.

use std::net::IpAddr;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::header::{self, HeaderName};
use http::{HeaderMap, Method, Uri};
use serde_json::Value;

use super::params::{parse_cookies, parse_query_string, params_to_value, ParamList};
use super::{md5_hex, Error, Result};

/// Header name constants for fast lookup.
mod header_names {
    use super::*;

    pub static ACCEPT: HeaderName = header::ACCEPT;
    pub static ACCEPT_CHARSET: HeaderName = header::ACCEPT_CHARSET;
    pub static ACCEPT_LANGUAGE: HeaderName = header::ACCEPT_LANGUAGE;
    pub static CONTENT_TYPE: HeaderName = header::CONTENT_TYPE;
    pub static COOKIE: HeaderName = header::COOKIE;
    pub static HOST: HeaderName = header::HOST;
    pub static USER_AGENT: HeaderName = header::USER_AGENT;
}

/// Lazily initialized custom header names.
static X_REQUEST_ID: std::sync::LazyLock<HeaderName> =
    std::sync::LazyLock::new(|| HeaderName::from_static("x-request-id"));
static X_FORWARDED_FOR: std::sync::LazyLock<HeaderName> =
    std::sync::LazyLock::new(|| HeaderName::from_static("x-forwarded-for"));

/// HTTP request.
///
/// Note: Clone is intentionally not derived to prevent expensive copies.
/// Use references or move semantics instead.
#[derive(Debug)]
pub struct Request {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    version: http::Version,
    peer: Option<IpAddr>,
    query: ParamList,
    cookies: ParamList,
    /// Multipart text fields, parsed by the server before dispatch.
    form_fields: ParamList,
    hash: String,
    rid: String,
}

impl Request {
    /// Create a new request.
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Self {
        let query = uri.query().map(parse_query_string).unwrap_or_default();
        let cookies = headers
            .get_all(&header_names::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(parse_cookies)
            .collect();

        let request_uri = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let hash = md5_hex(format!("{}{}", method.as_str().to_ascii_uppercase(), request_uri));
        let rid = headers
            .get(&*X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .map(str::to_string)
            .unwrap_or_else(|| make_rid(&hash));

        Self {
            method,
            uri,
            headers,
            body,
            version: http::Version::HTTP_11,
            peer: None,
            query,
            cookies,
            form_fields: Vec::new(),
            hash,
            rid,
        }
    }

    /// Set the peer address.
    #[inline]
    pub fn with_peer(mut self, peer: IpAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Attach multipart form fields.
    #[inline]
    pub fn with_form_fields(mut self, fields: ParamList) -> Self {
        self.form_fields = fields;
        self
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Uppercase method name.
    pub fn method_name(&self) -> String {
        self.method.as_str().to_ascii_uppercase()
    }

    /// Whether the method is GET or HEAD.
    #[inline]
    pub fn is_safe(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// Raw request path.
    #[inline]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Decoded path used for routing: no leading/trailing `/`, no empty,
    /// `.` or `..` segments.
    pub fn route_path(&self) -> String {
        let decoded = percent_encoding::percent_decode_str(self.uri.path()).decode_utf8_lossy();
        decoded
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .collect::<Vec<_>>()
            .join("/")
    }

    #[inline]
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Path plus `?query`.
    #[inline]
    pub fn request_uri(&self) -> &str {
        self.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    }

    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[inline]
    pub fn version(&self) -> http::Version {
        self.version
    }

    #[inline]
    pub fn set_version(&mut self, version: http::Version) {
        self.version = version;
    }

    #[inline]
    pub fn peer(&self) -> Option<IpAddr> {
        self.peer
    }

    /// md5 of method and request URI; keys the response cache.
    #[inline]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Request id (X-Request-ID, else derived from the hash and the clock).
    #[inline]
    pub fn rid(&self) -> &str {
        &self.rid
    }

    #[inline]
    fn header_by_name(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get a header value by string name (case-insensitive).
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.header_by_name(&header_names::CONTENT_TYPE)
    }

    #[inline]
    pub fn user_agent(&self) -> Option<&str> {
        self.header_by_name(&header_names::USER_AGENT)
    }

    /// Accepted media types, most preferred first.
    pub fn formats(&self) -> Vec<String> {
        qualified(self.header_by_name(&header_names::ACCEPT).unwrap_or(""))
            .into_iter()
            .filter(|(token, _)| token.contains('/'))
            .map(|(token, _)| token)
            .collect()
    }

    /// Accepted charsets, most preferred first.
    pub fn charsets(&self) -> Vec<String> {
        qualified(self.header_by_name(&header_names::ACCEPT_CHARSET).unwrap_or(""))
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    /// Accepted languages, most preferred first.
    pub fn locales(&self) -> Vec<String> {
        qualified(self.header_by_name(&header_names::ACCEPT_LANGUAGE).unwrap_or(""))
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    /// Host without port, lowercased. Defaults to `localhost`.
    pub fn host(&self) -> String {
        let raw = self
            .header_by_name(&header_names::HOST)
            .or_else(|| self.uri.host())
            .unwrap_or("");
        let host = strip_port(raw.trim()).to_ascii_lowercase();
        if host.is_empty() {
            "localhost".to_string()
        } else {
            host
        }
    }

    /// Client address: first X-Forwarded-For entry, else the peer.
    pub fn client(&self, anonymize: bool) -> String {
        let client = self
            .header_by_name(&X_FORWARDED_FOR)
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| self.peer.map(|ip| ip.to_string()))
            .unwrap_or_else(|| "0.0.0.0".to_string());

        if anonymize {
            anonymize_address(&client)
        } else {
            client
        }
    }

    #[inline]
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    /// First query value for `name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.param(name).is_some()
    }

    /// Query value parsed into `T`.
    pub fn param_as<T: FromStr>(&self, name: &str) -> Option<T> {
        self.param(name).and_then(|v| v.trim().parse().ok())
    }

    /// All values for `name`, including `name[]` entries.
    pub fn param_list(&self, name: &str) -> Vec<&str> {
        let list_name = format!("{}[]", name);
        self.query
            .iter()
            .filter(|(k, _)| *k == name || *k == list_name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Decode the body according to its content type.
    ///
    /// An empty body decodes to `null`.
    pub fn data(&self) -> Result<Value> {
        let essence = self
            .content_type()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .unwrap_or_default();

        if essence == "multipart/form-data" {
            return Ok(params_to_value(&self.form_fields));
        }
        if self.body.is_empty() {
            return Ok(Value::Null);
        }

        match essence.as_str() {
            "application/json" => decode_json(&self.body),
            e if e.ends_with("+json") => decode_json(&self.body),
            "" | "application/x-www-form-urlencoded" => {
                let text = std::str::from_utf8(&self.body)
                    .map_err(|_| Error::BadRequest("form body is not UTF-8".into()))?;
                Ok(params_to_value(&parse_query_string(text)))
            }
            other => Err(Error::UnsupportedMediaType(other.to_string())),
        }
    }
}

impl<B> From<http::Request<B>> for Request
where
    B: Into<Bytes>,
{
    fn from(req: http::Request<B>) -> Self {
        let (parts, body) = req.into_parts();
        let mut request = Self::new(parts.method, parts.uri, parts.headers, body.into());
        request.version = parts.version;
        request
    }
}

fn decode_json(body: &[u8]) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| Error::BadRequest(format!("malformed JSON: {}", e)))
}

/// Request id: hash prefix plus the current time in hex (seconds, microseconds).
fn make_rid(hash: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!(
        "{}{:08x}{:05x}",
        &hash[..7.min(hash.len())],
        now.as_secs(),
        now.subsec_micros()
    )
}

/// Parse a q-weighted header list. Sorted by weight (stable), `q=0` dropped.
pub fn qualified(header: &str) -> Vec<(String, f32)> {
    let mut items: Vec<(String, f32)> = Vec::new();

    for item in header.split(',') {
        let mut parts = item.split(';');
        let token = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        if token.is_empty() || items.iter().any(|(t, _)| *t == token) {
            continue;
        }

        let weight = parts
            .filter_map(|p| p.trim().strip_prefix("q="))
            .next()
            .map(|q| q.trim().parse::<f32>().unwrap_or(0.0))
            .unwrap_or(1.0);

        if weight > 0.0 {
            items.push((token, weight));
        }
    }

    items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    items
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Mask the last IPv4 octet or IPv6 group.
fn anonymize_address(address: &str) -> String {
    let separator = if address.contains('.') {
        '.'
    } else if address.contains(':') {
        ':'
    } else {
        return "XXX".to_string();
    };
    match address.rfind(separator) {
        Some(pos) => format!("{}{}XXX", &address[..pos], separator),
        None => "XXX".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::Ipv4Addr;

    fn request(method: &str, uri: &str, headers: &[(&str, &str)], body: &str) -> Request {
        let mut builder = http::Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        Request::from(builder.body(Bytes::from(body.to_string())).unwrap())
    }

    #[test]
    fn test_request_from_http() {
        let req = request("GET", "/test?foo=bar", &[("accept", "text/html")], "");
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.method_name(), "GET");
        assert_eq!(req.path(), "/test");
        assert_eq!(req.query(), Some("foo=bar"));
        assert_eq!(req.request_uri(), "/test?foo=bar");
        assert!(req.is_safe());
    }

    #[test]
    fn test_route_path_normalization() {
        assert_eq!(request("GET", "/", &[], "").route_path(), "");
        assert_eq!(request("GET", "/a/b/", &[], "").route_path(), "a/b");
        assert_eq!(request("GET", "/a//./../b", &[], "").route_path(), "a/b");
        assert_eq!(request("GET", "/a%20b/c.json", &[], "").route_path(), "a b/c.json");
        assert_eq!(request("GET", "/%2e%2e/etc", &[], "").route_path(), "etc");
    }

    #[test]
    fn test_hash_and_rid() {
        let req = request("get", "/a?b=1", &[], "");
        assert_eq!(req.hash(), md5_hex("GET/a?b=1"));
        assert_eq!(req.hash().len(), 32);
        assert!(req.rid().starts_with(&req.hash()[..7]));
        assert_eq!(req.rid().len(), 7 + 8 + 5);

        let req = request("GET", "/", &[("x-request-id", "abc123")], "");
        assert_eq!(req.rid(), "abc123");
    }

    #[test]
    fn test_formats_are_weighted_and_stable() {
        let req = request(
            "GET",
            "/",
            &[(
                "accept",
                "text/html;q=0.5, application/json, text/csv;q=0.5, */*;q=0.1, image/png;q=0",
            )],
            "",
        );
        assert_eq!(
            req.formats(),
            vec!["application/json", "text/html", "text/csv", "*/*"]
        );
        assert!(request("GET", "/", &[], "").formats().is_empty());
    }

    #[test]
    fn test_charsets_and_locales() {
        let req = request(
            "GET",
            "/",
            &[
                ("accept-charset", "iso-8859-1;q=0.2, utf-8"),
                ("accept-language", "de-DE, en;q=0.8, fr;q=0.9"),
            ],
            "",
        );
        assert_eq!(req.charsets(), vec!["utf-8", "iso-8859-1"]);
        assert_eq!(req.locales(), vec!["de-de", "fr", "en"]);
    }

    #[test]
    fn test_host() {
        assert_eq!(request("GET", "/", &[("host", "Example.COM:8080")], "").host(), "example.com");
        assert_eq!(request("GET", "/", &[("host", "[::1]:8080")], "").host(), "::1");
        assert_eq!(request("GET", "http://a.test/x", &[], "").host(), "a.test");
        assert_eq!(request("GET", "/", &[], "").host(), "localhost");
    }

    #[test]
    fn test_client_and_anonymize() {
        let req = request("GET", "/", &[], "").with_peer(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(req.client(false), "10.1.2.3");
        assert_eq!(req.client(true), "10.1.2.XXX");

        let req = request("GET", "/", &[("x-forwarded-for", "1.2.3.4, 10.0.0.1")], "");
        assert_eq!(req.client(false), "1.2.3.4");

        let req = request("GET", "/", &[("x-forwarded-for", "2001:db8::1")], "");
        assert_eq!(req.client(true), "2001:db8::XXX");

        assert_eq!(request("GET", "/", &[], "").client(false), "0.0.0.0");
    }

    #[test]
    fn test_params() {
        let req = request("GET", "/?limit=10&ids%5B%5D=1&ids%5B%5D=2&ids=3&flag", &[], "");
        assert_eq!(req.param("limit"), Some("10"));
        assert_eq!(req.param_as::<u32>("limit"), Some(10));
        assert_eq!(req.param_as::<u32>("flag"), None);
        assert!(req.has_param("flag"));
        assert_eq!(req.param_list("ids"), vec!["1", "2", "3"]);
        assert_eq!(req.query_params().len(), 5);
    }

    #[test]
    fn test_cookies() {
        let req = request("GET", "/", &[("cookie", "sid=abc; theme=dark")], "");
        assert_eq!(req.cookie("sid"), Some("abc"));
        assert_eq!(req.cookie("theme"), Some("dark"));
        assert_eq!(req.cookie("nope"), None);
    }

    #[test]
    fn test_data_decoding() {
        let req = request(
            "POST",
            "/",
            &[("content-type", "application/json; charset=utf-8")],
            r#"{"a":1}"#,
        );
        assert_eq!(req.data().unwrap(), json!({"a": 1}));

        let req = request(
            "POST",
            "/",
            &[("content-type", "application/x-www-form-urlencoded")],
            "a=1&b=two+words",
        );
        assert_eq!(req.data().unwrap(), json!({"a": "1", "b": "two words"}));

        let req = request("POST", "/", &[], "");
        assert_eq!(req.data().unwrap(), Value::Null);

        let req = request("POST", "/", &[("content-type", "multipart/form-data; boundary=x")], "")
            .with_form_fields(vec![("name".into(), "value".into())]);
        assert_eq!(req.data().unwrap(), json!({"name": "value"}));
    }

    #[test]
    fn test_data_errors() {
        let req = request("POST", "/", &[("content-type", "application/json")], "{nope");
        assert!(matches!(req.data(), Err(Error::BadRequest(_))));

        let req = request("POST", "/", &[("content-type", "text/plain")], "hi");
        assert!(matches!(req.data(), Err(Error::UnsupportedMediaType(_))));
    }

    #[test]
    fn test_qualified_ignores_duplicates_and_garbage() {
        assert_eq!(
            qualified("a, a;q=0.1, b;q=abc, , c;q=0.5"),
            vec![("a".to_string(), 1.0), ("c".to_string(), 0.5)]
        );
    }
}
