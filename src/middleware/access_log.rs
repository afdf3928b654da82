//! Access log, emitted at INFO with target `access`.

use crate::core::{Context, Request, Response};

use super::{Middleware, MiddlewareResult};

/// Request fields captured on the way in.
struct Captured {
    method: String,
    path: String,
    query: Option<String>,
    ua: Option<String>,
    referer: Option<String>,
    xff: Option<String>,
}

const CAPTURED: &str = "access_log";

#[derive(Default)]
pub struct AccessLogMiddleware;

impl AccessLogMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for AccessLogMiddleware {
    fn name(&self) -> &'static str {
        "access_log"
    }

    fn priority(&self) -> i32 {
        -90
    }

    fn on_request(&self, req: Request, ctx: &mut Context) -> MiddlewareResult {
        ctx.set(
            CAPTURED,
            Captured {
                method: req.method().to_string(),
                path: req.path().to_string(),
                query: req.query().map(str::to_string),
                ua: req.user_agent().map(str::to_string),
                referer: req.header("referer").map(str::to_string),
                xff: req.header("x-forwarded-for").map(str::to_string),
            },
        );
        MiddlewareResult::Next(req)
    }

    fn on_response(&self, res: Response, ctx: &Context) -> Response {
        // Short-circuited before on_request ran.
        let Some(req) = ctx.get::<Captured>(CAPTURED) else {
            return res;
        };

        tracing::info!(
            target: "access",
            method = %req.method,
            path = %req.path,
            query = req.query.as_deref(),
            status = res.status().as_u16(),
            bytes = res.body_len() as u64,
            duration_ms = ctx.elapsed_ms(),
            ip = %ctx.client_ip,
            ua = req.ua.as_deref(),
            referer = req.referer.as_deref(),
            xff = req.xff.as_deref(),
            request_id = %ctx.request_id,
            http = %ctx.http_version,
            "{} {} {}",
            req.method,
            req.path,
            res.status().as_u16()
        );

        res
    }
}
