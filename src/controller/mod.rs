//! Controllers and the controller registry.
//!
//! The dispatcher resolves `METHOD:path` to a controller name through the
//! site's `routes` table, builds the controller from the registry, then calls
//! [`Controller::bootstrap`] and [`Controller::respond`].

mod data;
mod error;
mod file;
mod html;
mod image;
mod rest;
mod script;
mod token;

pub use data::DataController;
pub use error::ErrorController;
pub use file::FileController;
pub use html::HtmlController;
pub use image::ImageController;
pub use rest::RestController;
pub use script::ScriptController;
pub use token::TokenController;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::broker::Broker;
use crate::core::{Error, Request, Response, Result};
use crate::data::DataTree;
use crate::environment::Environment;
use crate::model::Database;
use crate::session::SessionStore;

/// Services available to controllers for one request.
#[derive(Clone)]
pub struct Site {
    pub env: Arc<Environment>,
    pub broker: Arc<Broker>,
    pub data: Arc<DataTree>,
    pub database: Arc<dyn Database>,
    pub sessions: Arc<SessionStore>,
}

pub trait Controller: Send {
    /// Receive the routed method and path before responding.
    fn bootstrap(&mut self, method: &str, path: &str) -> Result<()>;

    fn respond(&mut self, request: &Request) -> Result<Response>;
}

type Factory = Arc<dyn Fn(Site) -> Box<dyn Controller> + Send + Sync>;

/// Controller name → factory.
#[derive(Clone, Default)]
pub struct ControllerRegistry {
    factories: HashMap<String, Factory>,
}

impl ControllerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in controllers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("error", |site| Box::new(ErrorController::new(site)));
        registry.register("file", |site| Box::new(FileController::new(site)));
        registry.register("html", |site| Box::new(HtmlController::new(site)));
        registry.register("data", |site| Box::new(DataController::new(site)));
        registry.register("rest", |site| Box::new(RestController::new(site)));
        registry.register("token", |site| Box::new(TokenController::new(site)));
        registry.register("image", |site| Box::new(ImageController::new(site)));
        registry.register("script", |site| Box::new(ScriptController::new(site)));
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(Site) -> Box<dyn Controller> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str, site: Site) -> Option<Box<dyn Controller>> {
        self.factories.get(name).map(|factory| factory(site))
    }
}

/// Resolve a routed path under `dir`. Only normal components are accepted.
pub(crate) fn resolve_under(dir: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(Error::NotFound);
    }
    Ok(dir.join(relative))
}

/// Split `a/b.json` into (`a/b`, Some(`json`)).
pub(crate) fn split_extension(path: &str) -> (&str, Option<&str>) {
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let at = name_start + dot;
            (&path[..at], Some(&path[at + 1..]))
        }
        _ => (path, None),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::cache::Cache;
    use crate::model::MemoryDatabase;
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue, Method, Uri};

    /// Site rooted at `root` with built-in configuration.
    pub fn site(root: &Path) -> Site {
        let cache = Cache::in_memory();
        let env = Arc::new(
            Environment::with_defaults("localhost", root, cache.for_host("localhost")).unwrap(),
        );
        Site {
            data: Arc::new(DataTree::new(env.dir("dat"))),
            broker: Arc::new(Broker::new()),
            database: Arc::new(MemoryDatabase::new()),
            sessions: Arc::new(SessionStore::new(Arc::new(cache))),
            env,
        }
    }

    pub fn request(method: Method, uri: &str, headers: &[(&str, &str)], body: &str) -> Request {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        Request::new(
            method,
            uri.parse::<Uri>().unwrap(),
            map,
            Bytes::from(body.to_string()),
        )
    }

    /// Bootstrap and respond with the request's own method and route path.
    pub fn respond(controller: &mut dyn Controller, request: &Request) -> Result<Response> {
        controller.bootstrap(&request.method_name(), &request.route_path())?;
        controller.respond(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_defaults() {
        let registry = ControllerRegistry::with_defaults();
        for name in [
            "error", "file", "html", "data", "rest", "token", "image", "script",
        ] {
            assert!(registry.contains(name), "{}", name);
        }
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn test_resolve_under_rejects_escapes() {
        let dir = Path::new("/srv/pub");
        assert_eq!(
            resolve_under(dir, "css/site.css").unwrap(),
            PathBuf::from("/srv/pub/css/site.css")
        );
        assert!(resolve_under(dir, "../etc/passwd").is_err());
        assert!(resolve_under(dir, "/etc/passwd").is_err());
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("a/b.json"), ("a/b", Some("json")));
        assert_eq!(split_extension("a.b/c"), ("a.b/c", None));
        assert_eq!(split_extension(".hidden"), (".hidden", None));
        assert_eq!(split_extension("x.tar.gz"), ("x.tar", Some("gz")));
    }
}
