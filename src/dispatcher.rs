//! Front controller.
//!
//! [`Dispatcher::handle`] takes a request through: environment lookup,
//! `rewrite`, CSRF authorization, the response cache (GET/HEAD) or direct
//! dispatch, `response`, and delivery. Failures are published on `exception`
//! and rendered by the error controller, never cached.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::broker::{topics, Broker, Event};
use crate::cache::{NEVER, NO_EXPIRY};
use crate::controller::{Controller, ControllerRegistry, ErrorController, Site};
use crate::core::{CachedResponse, Error, Request, Response, Result};
use crate::data::DataTree;
use crate::environment::{Environment, EnvironmentLoader};
use crate::model::Database;
use crate::session::SessionStore;
use crate::values::{is_truthy, to_plain_string};

const CSRF_HEADER: &str = "x-csrf-token";
const CSRF_FIELD: &str = "csrf_token";

pub struct Dispatcher {
    environments: EnvironmentLoader,
    broker: Arc<Broker>,
    database: Arc<dyn Database>,
    sessions: Arc<SessionStore>,
    controllers: ControllerRegistry,
    data: RwLock<HashMap<PathBuf, Arc<DataTree>>>,
}

impl Dispatcher {
    pub fn new(
        environments: EnvironmentLoader,
        broker: Arc<Broker>,
        database: Arc<dyn Database>,
        sessions: Arc<SessionStore>,
        controllers: ControllerRegistry,
    ) -> Self {
        Self {
            environments,
            broker,
            database,
            sessions,
            controllers,
            data: RwLock::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    #[inline]
    pub fn controllers_mut(&mut self) -> &mut ControllerRegistry {
        &mut self.controllers
    }

    /// Environment for `host`.
    pub fn environment(&self, host: &str) -> Result<Arc<Environment>> {
        self.environments.for_host(host)
    }

    /// Handle one request into its wire response.
    pub fn handle(&self, request: Request) -> http::Response<Bytes> {
        self.respond(&request).into()
    }

    /// Delivered response for `request`. Never fails; errors become error pages.
    pub fn respond(&self, request: &Request) -> Response {
        let env = match self.environments.for_host(&request.host()) {
            Ok(env) => env,
            Err(e) => {
                error!(rid = request.rid(), host = %request.host(), error = %e, "environment unavailable");
                return Response::internal_error("Site configuration unavailable");
            }
        };
        let site = self.site(env);

        match self.process(request, &site) {
            Ok(response) => response,
            Err(e) => self.fail(request, &site, e),
        }
    }

    fn site(&self, env: Arc<Environment>) -> Site {
        let dir = env.dir("dat");
        let data = {
            let trees = self.data.read().unwrap_or_else(PoisonError::into_inner);
            trees.get(&dir).cloned()
        };
        let data = data.unwrap_or_else(|| {
            let mut trees = self.data.write().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                trees
                    .entry(dir.clone())
                    .or_insert_with(|| Arc::new(DataTree::new(dir))),
            )
        });

        Site {
            env,
            broker: Arc::clone(&self.broker),
            data,
            database: Arc::clone(&self.database),
            sessions: Arc::clone(&self.sessions),
        }
    }

    fn process(&self, request: &Request, site: &Site) -> Result<Response> {
        let env = &site.env;
        let mut method = request.method_name();
        let mut path = request.route_path();
        self.broker.publish(
            topics::REWRITE,
            &mut Event::Rewrite {
                method: &mut method,
                path: &mut path,
            },
        )?;

        self.authorize(request, site, &method, &path)?;

        let response = if method == "GET" || method == "HEAD" {
            self.cached(request, site, &method, &path)?
        } else {
            self.direct(request, site, &method, &path)?
        };

        self.broker.publish(
            topics::RESPONSE,
            &mut Event::Response {
                request,
                response: &response,
            },
        )?;
        response.deliver(request, env)
    }

    /// CSRF check for routes the `csrf` table marks.
    fn authorize(&self, request: &Request, site: &Site, method: &str, path: &str) -> Result<()> {
        let key = format!("{}:{}", method, path);
        if !site.env.resolve("csrf", &key).is_some_and(|v| is_truthy(&v)) {
            return Ok(());
        }

        let session = site.sessions.load(request, &site.env);
        let expected = session.peek_token().unwrap_or_default();
        let provided = match request.header(CSRF_HEADER) {
            Some(token) => token.to_string(),
            None => request
                .data()
                .ok()
                .and_then(|body| body.get(CSRF_FIELD).map(to_plain_string))
                .unwrap_or_default(),
        };

        if expected.is_empty() || !constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
            warn!(rid = request.rid(), key = %key, "CSRF token mismatch");
            return Err(Error::Forbidden("invalid CSRF token".into()));
        }
        Ok(())
    }

    /// Serve from the response cache, filling it on a miss.
    fn cached(&self, request: &Request, site: &Site, method: &str, path: &str) -> Result<Response> {
        let cache = site.env.cache();
        let key = format!("response:{}", request.hash());

        if let Some(cached) = cache.get_value::<CachedResponse>(&key) {
            debug!(rid = request.rid(), key = %key, "response cache hit");
            return Response::try_from(cached);
        }

        let response = self.direct(request, site, method, path)?;
        if response.ttl() != NEVER {
            let ttl = if response.ttl() > 0 {
                response.ttl()
            } else {
                NO_EXPIRY
            };
            if let Err(e) = cache.set(&key, &response.snapshot(), ttl) {
                warn!(rid = request.rid(), error = %e, "failed to cache response");
            }
        }
        Ok(response)
    }

    /// Route to a controller and let it respond.
    fn direct(&self, request: &Request, site: &Site, method: &str, path: &str) -> Result<Response> {
        let key = format!("{}:{}", method, path);
        let name = match site.env.resolve("routes", &key) {
            Some(Value::String(name)) => name,
            _ => return Err(Error::NotImplemented),
        };
        let mut controller = self
            .controllers
            .create(&name, site.clone())
            .ok_or(Error::NotImplemented)?;

        debug!(rid = request.rid(), key = %key, controller = %name, "dispatch");
        self.broker.publish(
            topics::PREPROCESS,
            &mut Event::Preprocess {
                controller: &name,
                method,
                path,
            },
        )?;

        controller.bootstrap(method, path)?;
        controller.respond(request)
    }

    /// Publish the failure and render the error page.
    fn fail(&self, request: &Request, site: &Site, error: Error) -> Response {
        if let Err(e) = self.broker.publish(
            topics::EXCEPTION,
            &mut Event::Exception {
                request: Some(request),
                error: &error,
            },
        ) {
            debug!(error = %e, "exception handler failed");
        }

        let mut controller = ErrorController::new(site.clone()).with_error(&error);
        let rendered = controller
            .respond(request)
            .and_then(|response| response.deliver(request, &site.env));
        match rendered {
            Ok(response) => response,
            Err(e) => {
                error!(rid = request.rid(), error = %e, "error page failed");
                Response::internal_error("Internal Server Error")
                    .with_status(error.status())
            }
        }
    }
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
