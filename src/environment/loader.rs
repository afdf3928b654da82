//! Builds and memoises [`Environment`]s from `<root>/cnf/*.toml`.
//!
//! Each site file may carry two reserved keys:
//!
//! - `hosts`: host patterns (string or list) the file applies to
//! - `extends`: stem of another site file to inherit from
//!
//! The file whose `hosts` pattern best matches the request host is selected,
//! its `extends` chain is followed to the root, and the chain is merged over
//! the built-in defaults (root first, selected file last).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::UNIX_EPOCH;

use serde_json::Value;
use tracing::{debug, info};

use super::{defaults, Environment};
use crate::cache::{Cache, NO_EXPIRY};
use crate::core::{Error, Result};
use crate::routing::RoutingTable;
use crate::values::override_values;

const CONFIG_DIR: &str = "cnf";
const CACHE_KEY: &str = "environment";

/// Site name of the environment used when no site file matches a host.
pub const DEFAULT_SITE: &str = "*";

/// Parsed site files and their host patterns.
struct Sites {
    mtime: u64,
    files: BTreeMap<String, Value>,
    hosts: RoutingTable<String>,
}

/// Loads site environments per host.
///
/// Environments are memoised per selected site file, so any number of
/// request hosts share at most one environment per file plus the defaults.
pub struct EnvironmentLoader {
    root: PathBuf,
    cache: Cache,
    sites: RwLock<Option<Arc<Sites>>>,
    loaded: RwLock<HashMap<Option<String>, Arc<Environment>>>,
}

impl EnvironmentLoader {
    pub fn new(root: impl Into<PathBuf>, cache: Cache) -> Self {
        Self {
            root: root.into(),
            cache,
            sites: RwLock::new(None),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Environment for `host`, rebuilt when a site file changed.
    pub fn for_host(&self, host: &str) -> Result<Arc<Environment>> {
        let sites = self.sites()?;
        let selected = sites.hosts.route(host).map(|m| m.destination.clone());

        if let Some(env) = self
            .loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&selected)
        {
            if env.mtime() >= sites.mtime {
                return Ok(Arc::clone(env));
            }
        }

        let name = selected.as_deref().unwrap_or(DEFAULT_SITE);
        let cache = self.cache.for_host(name);
        let tree = match cache.get::<Value>(CACHE_KEY) {
            Some((tree, written)) if written >= sites.mtime => tree,
            _ => {
                let tree = build_tree(selected.as_deref(), &sites.files)?;
                cache.set(CACHE_KEY, &tree, NO_EXPIRY)?;
                tree
            }
        };

        let env = Arc::new(Environment::new(
            name,
            self.root.clone(),
            tree,
            sites.mtime,
            cache,
        ));
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(selected, Arc::clone(&env));
        Ok(env)
    }

    /// Site files and host patterns, re-read when the config dir changed.
    fn sites(&self) -> Result<Arc<Sites>> {
        let mtime = self.config_mtime();
        if let Some(sites) = self
            .sites
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            if sites.mtime >= mtime {
                return Ok(Arc::clone(sites));
            }
        }

        let files = self.read_site_files()?;
        let mut hosts = RoutingTable::new();
        for (stem, tree) in &files {
            for pattern in host_patterns(tree) {
                hosts.insert(pattern, stem.clone())?;
            }
        }
        debug!(files = files.len(), "site files loaded");

        let sites = Arc::new(Sites {
            mtime,
            files,
            hosts,
        });
        *self.sites.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&sites));
        Ok(sites)
    }

    /// Newest modification time (Unix seconds) of the config dir and its files.
    fn config_mtime(&self) -> u64 {
        let dir = self.root.join(CONFIG_DIR);
        let Ok(entries) = fs::read_dir(&dir) else {
            return 0;
        };

        entries
            .flatten()
            .map(|entry| entry.path())
            .chain(std::iter::once(dir))
            .filter_map(|path| mtime_secs(&path))
            .max()
            .unwrap_or(0)
    }

    /// Site files keyed by stem, in stem order.
    fn read_site_files(&self) -> Result<BTreeMap<String, Value>> {
        let dir = self.root.join(CONFIG_DIR);
        let mut files = BTreeMap::new();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = fs::read_to_string(&path)?;
            let tree: Value = toml::from_str(&text)?;
            files.insert(stem.to_string(), tree);
        }
        Ok(files)
    }
}

/// Defaults merged with the `extends` chain of `selected`.
fn build_tree(selected: Option<&str>, files: &BTreeMap<String, Value>) -> Result<Value> {
    let mut tree = defaults()?;
    let Some(selected) = selected else {
        debug!("no site file matches host, using defaults");
        return Ok(tree);
    };

    let chain = extends_chain(selected, files)?;
    for stem in chain.iter().rev() {
        let mut overlay = files.get(stem).cloned().unwrap_or(Value::Null);
        if let Value::Object(map) = &mut overlay {
            map.remove("hosts");
            map.remove("extends");
        }
        override_values(&mut tree, overlay);
    }

    info!(site = selected, chain = ?chain, "site environment built");
    Ok(tree)
}

pub(crate) fn mtime_secs(path: &Path) -> Option<u64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(modified.duration_since(UNIX_EPOCH).ok()?.as_secs())
}

fn host_patterns(tree: &Value) -> Vec<String> {
    match tree.get("hosts") {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// `selected` followed by its ancestors.
fn extends_chain(selected: &str, files: &BTreeMap<String, Value>) -> Result<Vec<String>> {
    let mut chain = vec![selected.to_string()];
    let mut seen: HashSet<String> = chain.iter().cloned().collect();
    let mut current = selected.to_string();

    while let Some(parent) = files
        .get(&current)
        .and_then(|tree| tree.get("extends"))
        .and_then(Value::as_str)
    {
        if !files.contains_key(parent) {
            return Err(Error::Internal(format!(
                "site configuration '{}' extends unknown '{}'",
                current, parent
            )));
        }
        if !seen.insert(parent.to_string()) {
            return Err(Error::Internal(format!(
                "site configuration '{}' has a cyclic extends chain",
                selected
            )));
        }
        chain.push(parent.to_string());
        current = parent.to_string();
    }
    Ok(chain)
}
