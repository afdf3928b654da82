//! Host-routed, immutable site configuration.
//!
//! An [`Environment`] is the merged configuration tree for one site:
//! built-in defaults, then the `extends` chain of the selected site file,
//! then the site file itself. It is frozen once built.
//!
//! [`Environment::resolve`] routes a key through a pattern table inside the
//! configuration (for example `routes` or `csrf`) and memoises the answer in
//! the host-scoped cache.

mod loader;

pub use loader::{EnvironmentLoader, DEFAULT_SITE};
pub(crate) use loader::mtime_secs;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::cache::{Cache, NO_EXPIRY};
use crate::core::{Error, Result};
use crate::routing::RoutingTable;
use crate::values::{KeyPath, Values};

/// Built-in configuration tree (TOML).
pub const DEFAULTS: &str = include_str!("defaults.toml");

/// Parse the built-in configuration.
pub fn defaults() -> Result<Value> {
    Ok(toml::from_str(DEFAULTS)?)
}

/// Merged configuration for one site.
pub struct Environment {
    host: String,
    root: PathBuf,
    values: Values,
    /// Newest modification time of the site files this tree was built from.
    mtime: u64,
    cache: Cache,
    tables: RwLock<HashMap<String, Arc<RoutingTable<Value>>>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("host", &self.host)
            .field("root", &self.root)
            .field("mtime", &self.mtime)
            .finish()
    }
}

impl Environment {
    /// Wrap a merged tree. The tree is frozen.
    pub fn new(host: &str, root: impl Into<PathBuf>, tree: Value, mtime: u64, cache: Cache) -> Self {
        Self {
            host: host.to_string(),
            root: root.into(),
            values: Values::from(tree).freeze(),
            mtime,
            cache,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Environment built from the defaults only.
    pub fn with_defaults(host: &str, root: impl Into<PathBuf>, cache: Cache) -> Result<Self> {
        Ok(Self::new(host, root, defaults()?, 0, cache))
    }

    /// Site name: the selected site file stem, or [`DEFAULT_SITE`].
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Site root directory.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    /// Host-scoped cache.
    #[inline]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    #[inline]
    pub fn values(&self) -> &Values {
        &self.values
    }

    pub fn get<P: KeyPath + ?Sized>(&self, path: &P) -> Option<&Value> {
        self.values.get(path)
    }

    pub fn get_str<P: KeyPath + ?Sized>(&self, path: &P) -> Option<String> {
        self.values.get_str(path)
    }

    pub fn get_i64<P: KeyPath + ?Sized>(&self, path: &P) -> Option<i64> {
        self.values.get_i64(path)
    }

    pub fn get_bool<P: KeyPath + ?Sized>(&self, path: &P) -> bool {
        self.values.get_bool(path)
    }

    /// Writes are rejected: site configuration is immutable.
    pub fn set<P: KeyPath + ?Sized>(&self, path: &P, _value: Value) -> Result<()> {
        Err(Error::Immutable(path.display()))
    }

    pub fn is_debug(&self) -> bool {
        self.get_bool("debug")
    }

    /// Absolute directory for a `paths.<name>` entry.
    pub fn dir(&self, name: &str) -> PathBuf {
        let relative = self
            .get_str(&["paths", name])
            .unwrap_or_else(|| name.to_string());
        self.root.join(relative)
    }

    /// Route `key` through the pattern table at `property`.
    ///
    /// Returns the destination value, or None when the property is missing or
    /// no pattern matches.
    pub fn resolve(&self, property: &str, key: &str) -> Option<Value> {
        let cache_key = format!("environment:resolve:{}:{}", property, key);
        if let Some((cached, written)) = self.cache.get::<Option<Value>>(&cache_key) {
            if written >= self.mtime {
                return cached;
            }
        }

        let resolved = self
            .table(property)
            .and_then(|table| table.route(key).map(|m| m.destination.clone()));

        debug!(
            host = %self.host,
            property = property,
            key = key,
            found = resolved.is_some(),
            "resolved"
        );

        if let Err(e) = self.cache.set(&cache_key, &resolved, NO_EXPIRY) {
            debug!(error = %e, "failed to cache resolution");
        }
        resolved
    }

    /// Compiled pattern table for `property`, built on first use.
    fn table(&self, property: &str) -> Option<Arc<RoutingTable<Value>>> {
        if let Some(table) = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(property)
        {
            return Some(Arc::clone(table));
        }

        let Some(Value::Object(map)) = self.get(property) else {
            return None;
        };
        let table = match RoutingTable::from_pairs(map.iter().map(|(k, v)| (k.as_str(), v.clone())))
        {
            Ok(table) => Arc::new(table),
            Err(e) => {
                debug!(property = property, error = %e, "invalid pattern table");
                return None;
            }
        };

        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(property.to_string(), Arc::clone(&table));
        Some(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> Environment {
        Environment::with_defaults("localhost", "/srv/site", Cache::in_memory()).unwrap()
    }

    #[test]
    fn test_defaults_parse() {
        let tree = defaults().unwrap();
        assert_eq!(tree["mime"]["txt"], json!("text/plain"));
        assert_eq!(tree["expires"]["txt"], json!("1y"));
        assert_eq!(tree["session"]["cookie_name"], json!("sid"));
    }

    #[test]
    fn test_resolve_routes() {
        let env = env();
        assert_eq!(env.resolve("routes", "GET:"), Some(json!("html")));
        assert_eq!(env.resolve("routes", "GET:file"), Some(json!("html")));
        assert_eq!(env.resolve("routes", "GET:dir/file"), Some(json!("html")));
        assert_eq!(env.resolve("routes", "GET:file.json"), Some(json!("data")));
        assert_eq!(env.resolve("routes", "GET:dir/file.json"), Some(json!("data")));
        assert_eq!(env.resolve("routes", "GET:logo.png"), Some(json!("image")));
        assert_eq!(env.resolve("routes", "GET:css/site.min.css"), Some(json!("script")));
        assert_eq!(env.resolve("routes", "GET:robots.txt"), Some(json!("file")));
        assert_eq!(env.resolve("routes", "POST:api/user"), Some(json!("rest")));
        assert_eq!(env.resolve("routes", "GET:api/user/5.json"), Some(json!("rest")));
        assert_eq!(env.resolve("routes", "POST:contact"), None);
    }

    #[test]
    fn test_resolve_is_memoised_in_cache() {
        let env = env();
        assert_eq!(env.resolve("csrf", "POST:form"), Some(json!(true)));
        assert!(env.cache().has("environment:resolve:csrf:POST:form"));

        // Misses are memoised too
        assert_eq!(env.resolve("csrf", "GET:form"), None);
        assert!(env.cache().has("environment:resolve:csrf:GET:form"));
        assert_eq!(env.resolve("csrf", "GET:form"), None);
    }

    #[test]
    fn test_resolve_missing_property() {
        assert_eq!(env().resolve("nothing", "GET:x"), None);
        assert_eq!(env().resolve("debug", "GET:x"), None);
    }

    #[test]
    fn test_environment_is_immutable() {
        let env = env();
        assert!(matches!(env.set("debug", json!(true)), Err(Error::Immutable(_))));
        assert!(env.values().is_immutable());
        assert!(!env.is_debug());
    }

    #[test]
    fn test_dir_paths() {
        let env = env();
        assert_eq!(env.dir("pub"), PathBuf::from("/srv/site/pub"));
        assert_eq!(env.dir("tpl"), PathBuf::from("/srv/site/tpl"));
        assert_eq!(env.dir("other"), PathBuf::from("/srv/site/other"));
    }
}
