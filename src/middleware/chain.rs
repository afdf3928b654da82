//! Priority-ordered middleware chain.

use std::sync::Arc;

use super::{Middleware, MiddlewareResult};
use crate::core::{Context, Request, Response};

/// Middleware in priority order.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware, keeping the chain sorted by priority.
    pub fn add<M: Middleware + 'static>(self, middleware: M) -> Self {
        self.add_arc(Arc::new(middleware))
    }

    pub fn add_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self.middlewares.sort_by_key(|m| m.priority());
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Names in request order.
    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    pub fn process_request(&self, mut req: Request, ctx: &mut Context) -> MiddlewareResult {
        for mw in &self.middlewares {
            match mw.on_request(req, ctx) {
                MiddlewareResult::Next(r) => req = r,
                MiddlewareResult::Stop(res) => {
                    tracing::debug!(
                        middleware = mw.name(),
                        status = %res.status(),
                        "middleware short-circuited request"
                    );
                    return MiddlewareResult::Stop(res);
                }
            }
        }
        MiddlewareResult::Next(req)
    }

    /// Run `on_response` in reverse order, then add the headers queued on `ctx`.
    pub fn process_response(&self, mut res: Response, ctx: &Context) -> Response {
        for mw in self.middlewares.iter().rev() {
            res = mw.on_response(res, ctx);
        }
        for (name, value) in ctx.response_headers() {
            if res.header(name).is_none() {
                res.set_header(name, value);
            }
        }
        res
    }

    /// Full cycle around `handler`. Short-circuited responses still go
    /// through `on_response`.
    pub fn process<F>(&self, req: Request, ctx: &mut Context, handler: F) -> Response
    where
        F: FnOnce(Request, &mut Context) -> Response,
    {
        let res = match self.process_request(req, ctx) {
            MiddlewareResult::Next(req) => handler(req, ctx),
            MiddlewareResult::Stop(res) => res,
        };
        self.process_response(res, ctx)
    }

    /// [`process`](Self::process) with an async handler.
    pub async fn process_async<F, Fut>(
        &self,
        req: Request,
        ctx: &mut Context,
        handler: F,
    ) -> Response
    where
        F: FnOnce(Request) -> Fut,
        Fut: std::future::Future<Output = Response>,
    {
        let res = match self.process_request(req, ctx) {
            MiddlewareResult::Next(req) => handler(req).await,
            MiddlewareResult::Stop(res) => res,
        };
        self.process_response(res, ctx)
    }
}
