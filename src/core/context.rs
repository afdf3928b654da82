//! Request context for the middleware pipeline.

use std::any::Any;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Instant;

use super::Request;

/// HTTP version as static string (no allocation).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HttpVersion(&'static str);

impl HttpVersion {
    pub const HTTP_10: Self = Self("HTTP/1.0");
    pub const HTTP_11: Self = Self("HTTP/1.1");
    pub const HTTP_20: Self = Self("HTTP/2.0");

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        self.0
    }

    #[inline]
    pub fn from_http(version: http::Version) -> Self {
        match version {
            http::Version::HTTP_10 => Self::HTTP_10,
            http::Version::HTTP_2 => Self::HTTP_20,
            _ => Self::HTTP_11,
        }
    }
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl Default for HttpVersion {
    fn default() -> Self {
        Self::HTTP_11
    }
}

/// Request-scoped data shared by middleware.
///
/// Carries the client address, the request id, timing, headers middleware
/// wants added to the response and typed values for middleware communication.
pub struct Context {
    /// Peer IP address.
    pub client_ip: IpAddr,

    /// Request id, as reported by [`Request::rid`].
    pub request_id: String,

    /// Request start time.
    pub started_at: Instant,

    pub http_version: HttpVersion,

    response_headers: HashMap<String, String>,

    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Context {
    #[inline]
    pub fn new(client_ip: IpAddr, request_id: impl Into<String>) -> Self {
        Self {
            client_ip,
            request_id: request_id.into(),
            started_at: Instant::now(),
            http_version: HttpVersion::HTTP_11,
            response_headers: HashMap::with_capacity(4),
            values: HashMap::new(),
        }
    }

    /// Context for `request` arriving from `client_ip`.
    pub fn for_request(client_ip: IpAddr, request: &Request) -> Self {
        let mut ctx = Self::new(client_ip, request.rid());
        ctx.http_version = HttpVersion::from_http(request.version());
        ctx
    }

    #[inline]
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.values.insert(key.to_string(), Box::new(value));
    }

    #[inline]
    pub fn get<T: 'static>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref())
    }

    #[inline]
    pub fn get_mut<T: 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut())
    }

    #[inline]
    pub fn remove<T: 'static>(&mut self, key: &str) -> Option<T> {
        self.values
            .remove(key)
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Queue a header for the outgoing response.
    #[inline]
    pub fn set_response_header(&mut self, name: impl Into<String>, value: impl ToString) {
        self.response_headers.insert(name.into(), value.to_string());
    }

    #[inline]
    pub fn response_headers(&self) -> &HashMap<String, String> {
        &self.response_headers
    }

    #[inline]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    #[inline]
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}
