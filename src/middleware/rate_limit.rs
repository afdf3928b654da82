//! Per-IP fixed window rate limiting.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::config::MiddlewareConfig;
use crate::core::{Context, Request, Response};

use super::{Middleware, MiddlewareResult};

#[derive(Debug)]
struct Window {
    count: u64,
    started: Instant,
}

/// Outcome of [`RateLimiter::check`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u64,
    /// Seconds until the window resets.
    pub reset: u64,
}

pub struct RateLimiter {
    windows: RwLock<HashMap<IpAddr, Window>>,
    limit: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u64, window_secs: u64) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            limit,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Count a request from `ip` against its window.
    pub fn check(&self, ip: IpAddr) -> Decision {
        let now = Instant::now();

        // Rejections only need the read lock.
        {
            let windows = self.windows.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(w) = windows.get(&ip) {
                let elapsed = now.duration_since(w.started);
                if elapsed < self.window && w.count >= self.limit {
                    return self.denied(elapsed);
                }
            }
        }

        let mut windows = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        let w = windows.entry(ip).or_insert(Window {
            count: 0,
            started: now,
        });

        let elapsed = now.duration_since(w.started);
        if elapsed >= self.window {
            w.count = 1;
            w.started = now;
            Decision {
                allowed: true,
                remaining: self.limit.saturating_sub(1),
                reset: self.window.as_secs(),
            }
        } else if w.count < self.limit {
            w.count += 1;
            Decision {
                allowed: true,
                remaining: self.limit - w.count,
                reset: (self.window - elapsed).as_secs().max(1),
            }
        } else {
            self.denied(elapsed)
        }
    }

    /// Drop windows that have expired.
    pub fn purge(&self) {
        let now = Instant::now();
        self.windows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, w| now.duration_since(w.started) < self.window);
    }

    fn denied(&self, elapsed: Duration) -> Decision {
        Decision {
            allowed: false,
            remaining: 0,
            reset: self.window.saturating_sub(elapsed).as_secs().max(1),
        }
    }
}

/// Answers 429 with `Retry-After` once an IP exceeds its window.
pub struct RateLimitMiddleware {
    limiter: RateLimiter,
    limit: u64,
}

impl RateLimitMiddleware {
    pub fn new(limit: u64, window_secs: u64) -> Self {
        Self {
            limiter: RateLimiter::new(limit, window_secs),
            limit,
        }
    }

    /// `None` when rate limiting is off.
    pub fn from_config(config: &MiddlewareConfig) -> Option<Self> {
        config
            .rate_limit
            .map(|limit| Self::new(limit, config.rate_window))
    }

    #[inline]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn priority(&self) -> i32 {
        -100
    }

    fn on_request(&self, req: Request, ctx: &mut Context) -> MiddlewareResult {
        let decision = self.limiter.check(ctx.client_ip);

        ctx.set_response_header("x-ratelimit-limit", self.limit);
        ctx.set_response_header("x-ratelimit-remaining", decision.remaining);
        ctx.set_response_header("x-ratelimit-reset", decision.reset);

        if decision.allowed {
            return MiddlewareResult::Next(req);
        }

        tracing::debug!(
            ip = %ctx.client_ip,
            limit = self.limit,
            reset = decision.reset,
            "rate limit exceeded"
        );
        MiddlewareResult::Stop(Response::too_many_requests(decision.reset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn context(ip: IpAddr) -> Context {
        Context::new(ip, "rid")
    }

    fn request() -> Request {
        Request::new(
            http::Method::GET,
            "/test".parse().unwrap(),
            http::HeaderMap::new(),
            bytes::Bytes::new(),
        )
    }

    #[test]
    fn test_allows_under_limit() {
        let mw = RateLimitMiddleware::new(5, 60);
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

        for i in 0..5 {
            let result = mw.on_request(request(), &mut context(ip));
            assert!(result.is_next(), "request {} should be allowed", i);
        }
    }

    #[test]
    fn test_blocks_over_limit() {
        let mw = RateLimitMiddleware::new(3, 60);
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));

        for _ in 0..3 {
            assert!(mw.on_request(request(), &mut context(ip)).is_next());
        }

        let mut ctx = context(ip);
        let res = mw.on_request(request(), &mut ctx).into_response().unwrap();
        assert_eq!(res.status(), http::StatusCode::TOO_MANY_REQUESTS);
        assert!(res.header("retry-after").is_some());
        assert_eq!(
            ctx.response_headers().get("x-ratelimit-remaining"),
            Some(&"0".to_string())
        );
    }

    #[test]
    fn test_different_ips_separate_limits() {
        let mw = RateLimitMiddleware::new(2, 60);
        let ip1 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let ip2 = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        for _ in 0..2 {
            assert!(mw.on_request(request(), &mut context(ip1)).is_next());
        }
        assert!(mw.on_request(request(), &mut context(ip1)).is_stop());

        for _ in 0..2 {
            assert!(mw.on_request(request(), &mut context(ip2)).is_next());
        }
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new(1, 0);
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(limiter.check(ip).allowed);
        // A zero-length window is always expired.
        assert!(limiter.check(ip).allowed);
        limiter.purge();
        assert!(limiter.windows.read().unwrap().is_empty());
    }

    #[test]
    fn test_sets_rate_limit_headers() {
        let mw = RateLimitMiddleware::new(10, 60);
        let mut ctx = context(IpAddr::V4(Ipv4Addr::LOCALHOST));
        mw.on_request(request(), &mut ctx);

        let headers = ctx.response_headers();
        assert_eq!(headers.get("x-ratelimit-limit"), Some(&"10".to_string()));
        assert_eq!(headers.get("x-ratelimit-remaining"), Some(&"9".to_string()));
        assert!(headers.contains_key("x-ratelimit-reset"));
    }

    #[test]
    fn test_from_config() {
        let config = MiddlewareConfig {
            rate_limit: Some(100),
            rate_window: 120,
            access_log: false,
        };
        assert!(RateLimitMiddleware::from_config(&config).is_some());
        assert!(RateLimitMiddleware::from_config(&MiddlewareConfig::default()).is_none());
    }
}
