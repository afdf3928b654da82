//! Core error types.
//!
//! Every error maps to an HTTP status so the dispatcher can turn any failure
//! into an error page without further classification.

use std::fmt;

use http::StatusCode;

/// Core errors for request handling.
#[derive(Debug)]
pub enum Error {
    /// Malformed request (400).
    BadRequest(String),

    /// Request refused (403).
    Forbidden(String),

    /// No resource at this path (404).
    NotFound,

    /// Method not supported by the resource (405).
    MethodNotAllowed,

    /// No acceptable representation (406).
    NotAcceptable,

    /// State conflict (409).
    Conflict(String),

    /// Request body type not understood (415).
    UnsupportedMediaType(String),

    /// Internal failure (500).
    Internal(String),

    /// No controller for this route (501).
    NotImplemented,

    /// Temporarily unavailable (503).
    ServiceUnavailable,

    /// Write attempted on an immutable value tree.
    Immutable(String),

    /// Model field failed validation.
    Validation { field: String, reason: String },

    /// Dependency container failure.
    Container(String),

    /// Template parse failure.
    Template(String),

    /// I/O error.
    Io(std::io::Error),

    /// JSON encode/decode error.
    Json(serde_json::Error),

    /// Site configuration parse error.
    Toml(toml::de::Error),

    /// HTTP error.
    Http(http::Error),
}

impl Error {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) | Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Error::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Error::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short variant name, used in debug dumps and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "BadRequest",
            Error::Forbidden(_) => "Forbidden",
            Error::NotFound => "NotFound",
            Error::MethodNotAllowed => "MethodNotAllowed",
            Error::NotAcceptable => "NotAcceptable",
            Error::Conflict(_) => "Conflict",
            Error::UnsupportedMediaType(_) => "UnsupportedMediaType",
            Error::Internal(_) => "Internal",
            Error::NotImplemented => "NotImplemented",
            Error::ServiceUnavailable => "ServiceUnavailable",
            Error::Immutable(_) => "Immutable",
            Error::Validation { .. } => "Validation",
            Error::Container(_) => "Container",
            Error::Template(_) => "Template",
            Error::Io(_) => "Io",
            Error::Json(_) => "Json",
            Error::Toml(_) => "Toml",
            Error::Http(_) => "Http",
        }
    }

    /// Check if this error is the client's fault (4xx).
    #[inline]
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BadRequest(msg) => write!(f, "bad request: {}", msg),
            Error::Forbidden(msg) => write!(f, "forbidden: {}", msg),
            Error::NotFound => f.write_str("not found"),
            Error::MethodNotAllowed => f.write_str("method not allowed"),
            Error::NotAcceptable => f.write_str("not acceptable"),
            Error::Conflict(msg) => write!(f, "conflict: {}", msg),
            Error::UnsupportedMediaType(ty) => write!(f, "unsupported media type: {}", ty),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
            Error::NotImplemented => f.write_str("not implemented"),
            Error::ServiceUnavailable => f.write_str("service unavailable"),
            Error::Immutable(path) => write!(f, "cannot modify immutable value at '{}'", path),
            Error::Validation { field, reason } => {
                write!(f, "validation failed for '{}': {}", field, reason)
            }
            Error::Container(msg) => write!(f, "container error: {}", msg),
            Error::Template(msg) => write!(f, "template error: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Json(e) => write!(f, "JSON error: {}", e),
            Error::Toml(e) => write!(f, "config error: {}", e),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Toml(e) => Some(e),
            Error::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Toml(e)
    }
}

impl From<http::Error> for Error {
    fn from(e: http::Error) -> Self {
        Error::Http(e)
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Internal(msg.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
