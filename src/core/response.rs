//! HTTP response abstraction.
//!
//! A [`Response`] is built by a controller (`set_body`, `set_data`,
//! `set_file`, `redirect`), optionally stored in the response cache as a
//! [`CachedResponse`], and finally turned into wire headers by
//! [`Response::deliver`].

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use http::header::{self, HeaderName};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{md5_hex, Error, Request, Result};
use crate::config::parse::parse_duration;
use crate::environment::Environment;
use crate::export;
use crate::values::to_plain_string;

/// Common header name constants for fast lookup.
mod header_names {
    use super::*;
    pub static CACHE_CONTROL: HeaderName = header::CACHE_CONTROL;
    pub static CONTENT_LENGTH: HeaderName = header::CONTENT_LENGTH;
    pub static CONTENT_TYPE: HeaderName = header::CONTENT_TYPE;
    pub static ETAG: HeaderName = header::ETAG;
    pub static EXPIRES: HeaderName = header::EXPIRES;
    pub static IF_NONE_MATCH: HeaderName = header::IF_NONE_MATCH;
    pub static LOCATION: HeaderName = header::LOCATION;
    pub static PRAGMA: HeaderName = header::PRAGMA;
    pub static RETRY_AFTER: HeaderName = header::RETRY_AFTER;
    pub static SET_COOKIE: HeaderName = header::SET_COOKIE;
    pub static VARY: HeaderName = header::VARY;
}

/// Pre-allocated static header values.
mod header_values {
    use super::*;
    pub static NO_CACHE: HeaderValue = HeaderValue::from_static(
        "private, no-cache, no-store, must-revalidate, max-age=0, pre-check=0, post-check=0",
    );
    pub static REVALIDATE: HeaderValue = HeaderValue::from_static("public, must-revalidate");
    pub static PRAGMA_NO_CACHE: HeaderValue = HeaderValue::from_static("no-cache");
    pub static ACCEPT: HeaderValue = HeaderValue::from_static("Accept");
    pub static OCTET_STREAM: HeaderValue = HeaderValue::from_static("application/octet-stream");
}

/// Pre-allocated static bodies for common responses.
mod static_bodies {
    use super::*;
    pub static NOT_FOUND: Bytes = Bytes::from_static(b"Not Found");
    pub static TOO_MANY_REQUESTS: Bytes = Bytes::from_static(b"Too Many Requests");
}

static X_REQUEST_ID: std::sync::LazyLock<HeaderName> =
    std::sync::LazyLock::new(|| HeaderName::from_static("x-request-id"));

/// Default TTL for responses built without an environment.
pub const DEFAULT_TTL: i64 = 300;

const OCTET_STREAM: &str = "application/octet-stream";

/// HTTP response.
///
/// Note: Clone is intentionally not derived to prevent expensive copies.
/// Use references or move semantics instead.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    /// Response cache TTL: `-1` never cached, `0` no expiry.
    ttl: i64,
    /// md5 of the body, sent as ETag.
    hash: Option<String>,
    mime: Option<String>,
    /// Lifetime spec from the `expires` table (`""`, `"-1"` or a duration).
    expires: String,
    kind: Option<String>,
    file: Option<PathBuf>,
    location: Option<String>,
    vary_accept: bool,
    /// Data behind a negotiated body, re-encoded per request on delivery.
    raw: Option<Value>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            ttl: DEFAULT_TTL,
            hash: None,
            mime: None,
            expires: String::new(),
            kind: None,
            file: None,
            location: None,
            vary_accept: false,
            raw: None,
        }
    }
}

impl Response {
    /// Empty 200 response with the site's default TTL.
    pub fn new(env: &Environment) -> Self {
        Self {
            ttl: env.get_i64("response_ttl").unwrap_or(DEFAULT_TTL),
            ..Self::default()
        }
    }

    /// 200 OK with a plain body.
    #[inline]
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: static_bodies::NOT_FOUND.clone(),
            ..Self::default()
        }
    }

    /// 500 with a plain message body.
    #[inline]
    pub fn internal_error(msg: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: Bytes::copy_from_slice(msg.as_bytes()),
            ..Self::default()
        }
    }

    #[inline]
    pub fn too_many_requests(retry_after: u64) -> Self {
        let mut headers = HeaderMap::with_capacity(1);
        if let Ok(value) = HeaderValue::try_from(retry_after.to_string()) {
            headers.insert(header_names::RETRY_AFTER.clone(), value);
        }
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            headers,
            body: static_bodies::TOO_MANY_REQUESTS.clone(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    // Getters

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
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
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    #[inline]
    pub fn ttl(&self) -> i64 {
        self.ttl
    }

    #[inline]
    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    #[inline]
    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    #[inline]
    pub fn expires(&self) -> &str {
        &self.expires
    }

    #[inline]
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    #[inline]
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    #[inline]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Get a header value by string name (case-insensitive).
    #[inline]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(&header_names::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.status.is_client_error() || self.status.is_server_error()
    }

    // Modifiers

    #[inline]
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    #[inline]
    pub fn set_ttl(&mut self, ttl: i64) {
        self.ttl = ttl;
    }

    /// Add a header by string name and value; invalid pairs are ignored.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            if name == header_names::SET_COOKIE {
                self.headers.append(name, value);
            } else {
                self.headers.insert(name, value);
            }
        }
    }

    #[inline]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    #[inline]
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.set_header(name.as_ref(), value.as_ref());
        self
    }

    #[inline]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the body with its type key (`html`, `json`, `png`, ...).
    ///
    /// Records size, md5 hash, mime (`mime[kind]`, else guessed from the
    /// extension) and lifetime (`expires[kind]`).
    pub fn set_body(&mut self, body: impl Into<Bytes>, kind: &str, env: &Environment) {
        let body = body.into();
        self.hash = Some(md5_hex(&body));
        self.body = body;

        let kind = kind.to_ascii_lowercase();
        let mime = env
            .get_str(&["mime", kind.as_str()])
            .filter(|m| !m.is_empty())
            .or_else(|| {
                mime_guess::from_ext(&kind)
                    .first()
                    .map(|m| m.essence_str().to_string())
            })
            .unwrap_or_else(|| OCTET_STREAM.to_string());

        self.mime = Some(mime);
        self.expires = env
            .get_str(&["expires", kind.as_str()])
            .unwrap_or_default();
        self.kind = Some(kind);
    }

    /// Encode structured data.
    ///
    /// With a `kind` that has an encoder, that encoder is used. Otherwise the
    /// first acceptable format of the request that the site lists in
    /// `encoders` wins; the response then varies by Accept.
    pub fn set_data(
        &mut self,
        data: &Value,
        kind: Option<&str>,
        request: &Request,
        env: &Environment,
    ) -> Result<()> {
        let kind = match kind {
            Some(kind) if export::has_encoder(kind) => {
                self.raw = None;
                kind.to_string()
            }
            Some(_) => return Err(Error::NotAcceptable),
            None => {
                self.vary_accept = true;
                self.raw = Some(data.clone());
                negotiate_encoder(request, env).ok_or(Error::NotAcceptable)?
            }
        };

        let encoded = export::encode(&kind, data)?;
        self.set_body(encoded, &kind, env);
        Ok(())
    }

    /// Encode negotiated data for `request`, which may not be the request
    /// the body was first built for.
    fn renegotiate(&mut self, request: &Request, env: &Environment) -> Result<()> {
        let Some(raw) = self.raw.take() else {
            return Ok(());
        };
        let kind = negotiate_encoder(request, env).ok_or(Error::NotAcceptable)?;
        if self.kind.as_deref() != Some(kind.as_str()) {
            let encoded = export::encode(&kind, &raw)?;
            self.set_body(encoded, &kind, env);
        }
        self.raw = Some(raw);
        Ok(())
    }

    /// Serve a file.
    ///
    /// With `sendfile` configured, the path is recorded so the front proxy
    /// streams the file; the body is still read for size and ETag.
    pub fn set_file(&mut self, path: &Path, env: &Environment) -> Result<()> {
        let content = std::fs::read(path)?;
        let kind = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        self.set_body(content, &kind, env);

        let sendfile = env.get_str("sendfile").unwrap_or_default();
        if !sendfile.is_empty() {
            self.file = Some(path.to_path_buf());
        }
        Ok(())
    }

    /// Redirect to `location`.
    pub fn redirect(&mut self, location: impl Into<String>, status: StatusCode) {
        self.status = status;
        self.location = Some(location.into());
        self.body = Bytes::new();
        self.hash = None;
        self.raw = None;
    }

    /// Build wire headers for `request` and consume the response.
    ///
    /// Negotiated data is encoded for this request first. Order: default
    /// headers, redirect, cache headers, ETag and conditional 304, sendfile,
    /// content headers, HEAD handling.
    pub fn deliver(mut self, request: &Request, env: &Environment) -> Result<Response> {
        if self.status.is_success() {
            self.renegotiate(request, env)?;
        }
        let mut headers = HeaderMap::new();

        if let Some(Value::Object(defaults)) = env.get("headers") {
            for (name, value) in defaults {
                insert_header(&mut headers, name, &to_plain_string(value));
            }
        }
        if let Ok(rid) = HeaderValue::try_from(request.rid()) {
            headers.insert(X_REQUEST_ID.clone(), rid);
        }
        if self.vary_accept {
            headers.insert(header_names::VARY.clone(), header_values::ACCEPT.clone());
        }

        let mut deliver_body =
            request.method() != Method::HEAD || self.status == StatusCode::NO_CONTENT;
        let mut size = self.body.len();

        // Redirects
        if is_redirect(self.status) {
            let location = self
                .location
                .clone()
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| "/".to_string());
            insert_header(&mut headers, header_names::LOCATION.as_str(), &location);
            size = 0;
            deliver_body = false;
        }

        // Cache headers
        let uncacheable = self.expires == "-1"
            || !request.is_safe()
            || self.headers.contains_key(&header_names::SET_COOKIE)
            || env.is_debug();
        if uncacheable {
            headers.insert(header_names::CACHE_CONTROL.clone(), header_values::NO_CACHE.clone());
            headers.insert(header_names::PRAGMA.clone(), header_values::PRAGMA_NO_CACHE.clone());
        } else {
            match parse_duration(&self.expires).ok().flatten() {
                Some(lifetime) => {
                    let secs = lifetime.as_secs();
                    insert_header(
                        &mut headers,
                        header_names::CACHE_CONTROL.as_str(),
                        &format!("public, max-age={}", secs),
                    );
                    let expires_at =
                        Utc::now() + chrono::Duration::seconds(secs.min(i64::MAX as u64) as i64);
                    insert_header(
                        &mut headers,
                        header_names::EXPIRES.as_str(),
                        &expires_at.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
                    );
                }
                None => {
                    headers.insert(
                        header_names::CACHE_CONTROL.clone(),
                        header_values::REVALIDATE.clone(),
                    );
                }
            }
        }

        // ETag and conditional requests
        if let Some(hash) = &self.hash {
            let matches = request
                .headers()
                .get(&header_names::IF_NONE_MATCH)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| etag_matches(v, hash));
            if matches {
                self.status = StatusCode::NOT_MODIFIED;
                size = 0;
                deliver_body = false;
            }
            insert_header(&mut headers, header_names::ETAG.as_str(), &format!("\"{}\"", hash));
        }

        // Sendfile
        if let Some(file) = &self.file {
            let sendfile = env.get_str("sendfile").unwrap_or_default();
            if deliver_body && !sendfile.is_empty() {
                let root = env.get_str("sendfile_root").unwrap_or_default();
                let path = file.to_string_lossy();
                let path = path.strip_prefix(root.as_str()).unwrap_or(path.as_ref());
                insert_header(&mut headers, &sendfile, path);
                deliver_body = false;
            }
        }

        // Content headers
        let mime = self.mime.clone();
        if self.status.as_u16() < 300 {
            if let Some(mime) = &mime {
                negotiate_content(request, mime)?;
            }
        }
        match mime {
            Some(mime) if mime.starts_with("text/") => {
                insert_header(
                    &mut headers,
                    header_names::CONTENT_TYPE.as_str(),
                    &format!("{}; charset=utf-8", mime),
                );
            }
            Some(mime) => insert_header(&mut headers, header_names::CONTENT_TYPE.as_str(), &mime),
            None if size > 0 => {
                headers.insert(
                    header_names::CONTENT_TYPE.clone(),
                    header_values::OCTET_STREAM.clone(),
                );
            }
            None => {}
        }
        headers.insert(header_names::CONTENT_LENGTH.clone(), HeaderValue::from(size));

        // Headers set by the controller win over computed ones
        for name in self.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in self.headers.iter() {
            headers.append(name.clone(), value.clone());
        }

        Ok(Response {
            status: self.status,
            headers,
            body: if deliver_body { self.body } else { Bytes::new() },
            ttl: self.ttl,
            hash: self.hash,
            mime: self.mime,
            expires: self.expires,
            kind: self.kind,
            file: self.file,
            location: self.location,
            vary_accept: self.vary_accept,
            raw: self.raw,
        })
    }

    /// Serializable copy for the response cache.
    pub fn snapshot(&self) -> CachedResponse {
        CachedResponse {
            status: self.status.as_u16(),
            headers: self
                .headers
                .iter()
                .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
                .collect(),
            body: hex::encode(&self.body),
            ttl: self.ttl,
            hash: self.hash.clone(),
            mime: self.mime.clone(),
            expires: self.expires.clone(),
            kind: self.kind.clone(),
            file: self.file.clone(),
            location: self.location.clone(),
            vary_accept: self.vary_accept,
            raw: self.raw.clone(),
        }
    }
}

impl From<Response> for http::Response<Bytes> {
    fn from(res: Response) -> Self {
        let mut response = http::Response::new(res.body);
        *response.status_mut() = res.status;
        *response.headers_mut() = res.headers;
        response
    }
}

/// Cache form of a [`Response`], stored before delivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    /// Hex-encoded body.
    pub body: String,
    pub ttl: i64,
    pub hash: Option<String>,
    pub mime: Option<String>,
    pub expires: String,
    pub kind: Option<String>,
    pub file: Option<PathBuf>,
    pub location: Option<String>,
    pub vary_accept: bool,
    #[serde(default)]
    pub raw: Option<Value>,
}

impl TryFrom<CachedResponse> for Response {
    type Error = Error;

    fn try_from(cached: CachedResponse) -> Result<Self> {
        let status = StatusCode::from_u16(cached.status)
            .map_err(|e| Error::Internal(format!("cached status: {}", e)))?;
        let body = hex::decode(&cached.body)
            .map_err(|e| Error::Internal(format!("cached body: {}", e)))?;

        let mut response = Response {
            status,
            body: Bytes::from(body),
            ttl: cached.ttl,
            hash: cached.hash,
            mime: cached.mime,
            expires: cached.expires,
            kind: cached.kind,
            file: cached.file,
            location: cached.location,
            vary_accept: cached.vary_accept,
            raw: cached.raw,
            ..Response::default()
        };
        for (name, value) in &cached.headers {
            response.set_header(name, value);
        }
        Ok(response)
    }
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
        headers.insert(name, value);
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301..=303 | 305..=308)
}

/// Whether an If-None-Match list names `hash`.
fn etag_matches(header: &str, hash: &str) -> bool {
    header.split(',').any(|tag| {
        let tag = tag.trim();
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        tag.trim_matches('"') == hash
    })
}

/// Whether an Accept entry covers `mime` (`*/*`, `type/*` or exact).
pub fn accepts_mime(format: &str, mime: &str) -> bool {
    if format == "*/*" || format.eq_ignore_ascii_case(mime) {
        return true;
    }
    match format.strip_suffix("/*") {
        Some(major) => mime
            .split('/')
            .next()
            .is_some_and(|m| m.eq_ignore_ascii_case(major)),
        None => false,
    }
}

/// 406 unless the request accepts `mime` (and UTF-8 for text types).
fn negotiate_content(request: &Request, mime: &str) -> Result<()> {
    let formats = request.formats();
    if !formats.is_empty() && !formats.iter().any(|f| accepts_mime(f, mime)) {
        return Err(Error::NotAcceptable);
    }
    if mime.starts_with("text/") {
        let charsets = request.charsets();
        if !charsets.is_empty() && !charsets.iter().any(|c| c == "utf-8" || c == "*") {
            return Err(Error::NotAcceptable);
        }
    }
    Ok(())
}

/// First site encoder acceptable to the request.
fn negotiate_encoder(request: &Request, env: &Environment) -> Option<String> {
    let encoders: Vec<String> = match env.get("encoders") {
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(Value::as_str)
            .filter(|e| export::has_encoder(e))
            .map(str::to_string)
            .collect(),
        _ => export::ENCODERS.iter().map(|e| e.to_string()).collect(),
    };

    let mut formats = request.formats();
    if formats.is_empty() {
        formats.push("*/*".to_string());
    }

    formats.iter().find_map(|format| {
        encoders
            .iter()
            .find(|encoder| {
                let mime = env
                    .get_str(&["mime", encoder.as_str()])
                    .unwrap_or_default();
                !mime.is_empty() && accepts_mime(format, &mime)
            })
            .cloned()
    })
}
