//! Core types for HTTP request/response handling.
//!
//! - [`Request`] - HTTP request with negotiation and parameter helpers
//! - [`Response`] - controller output, cache snapshot and delivery
//! - [`Context`] - request context for middleware communication
//! - [`Error`] - core error type, mapped to HTTP statuses
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_mvc::core::{Request, Response};
//!
//! let mut res = Response::new(&env);
//! res.set_data(&serde_json::json!({"ok": true}), Some("json"), &req, &env)?;
//! let wire = res.deliver(&req, &env)?;
//! ```

mod context;
mod error;
pub mod params;
mod request;
mod response;

pub use context::{Context, HttpVersion};
pub use error::{Error, Result};
pub use request::{qualified, Request};
pub use response::{accepts_mime, CachedResponse, Response, DEFAULT_TTL};

use md5::{Digest, Md5};

/// Lowercase hex md5 digest.
pub fn md5_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Md5::digest(data.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("GET/"), md5_hex(b"GET/".as_slice()));
    }
}
