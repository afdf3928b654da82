//! Middleware around the dispatcher.
//!
//! Middleware sees every request before it reaches the [`Dispatcher`] and every
//! delivered response on the way out. It can:
//! - rewrite the request
//! - short-circuit with its own response (rate limiting)
//! - decorate the response or record it (access log)
//!
//! ```rust,ignore
//! let chain = MiddlewareChain::new()
//!     .add(RateLimitMiddleware::new(100, 60))
//!     .add(AccessLogMiddleware::new());
//!
//! let res = chain.process(req, &mut ctx, |req, _| dispatcher.respond(&req));
//! ```
//!
//! [`Dispatcher`]: crate::dispatcher::Dispatcher

mod chain;

pub mod access_log;
pub mod rate_limit;

pub use access_log::AccessLogMiddleware;
pub use chain::MiddlewareChain;
pub use rate_limit::{RateLimitMiddleware, RateLimiter};

use crate::config::MiddlewareConfig;
use crate::core::{Context, Request, Response};

/// Outcome of [`Middleware::on_request`].
#[derive(Debug)]
pub enum MiddlewareResult {
    /// Continue with the (possibly modified) request.
    Next(Request),
    /// Stop here and answer with this response.
    Stop(Response),
}

impl MiddlewareResult {
    #[inline]
    pub fn is_next(&self) -> bool {
        matches!(self, MiddlewareResult::Next(_))
    }

    #[inline]
    pub fn is_stop(&self) -> bool {
        matches!(self, MiddlewareResult::Stop(_))
    }

    pub fn into_request(self) -> Option<Request> {
        match self {
            MiddlewareResult::Next(req) => Some(req),
            MiddlewareResult::Stop(_) => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            MiddlewareResult::Next(_) => None,
            MiddlewareResult::Stop(res) => Some(res),
        }
    }
}

/// A request/response hook.
///
/// `on_request` runs in priority order (lowest first), `on_response` in
/// reverse:
///
/// ```text
/// Request → MW1.on_request → MW2.on_request → Dispatcher
///                                                 ↓
/// Response ← MW1.on_response ← MW2.on_response ←──┘
/// ```
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lower values see requests first and responses last.
    fn priority(&self) -> i32 {
        0
    }

    fn on_request(&self, req: Request, _ctx: &mut Context) -> MiddlewareResult {
        MiddlewareResult::Next(req)
    }

    fn on_response(&self, res: Response, _ctx: &Context) -> Response {
        res
    }
}

/// Chain for the process configuration: rate limit first, then access log.
pub fn from_config(config: &MiddlewareConfig) -> MiddlewareChain {
    let mut chain = MiddlewareChain::new();
    if let Some(limiter) = RateLimitMiddleware::from_config(config) {
        chain = chain.add(limiter);
    }
    if config.access_log {
        chain = chain.add(AccessLogMiddleware::new());
    }
    chain
}
