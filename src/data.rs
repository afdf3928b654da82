//! JSON data tree.
//!
//! Every `*.json` file below the data directory becomes a node keyed by its
//! stem; directories become nested objects. The tree is rebuilt when any file
//! or directory in it is newer than the loaded copy.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::debug;

use crate::core::{Error, Result};
use crate::environment::mtime_secs;
use crate::values::get_path;

struct Loaded {
    mtime: u64,
    tree: Arc<Value>,
}

pub struct DataTree {
    dir: PathBuf,
    loaded: RwLock<Option<Loaded>>,
}

impl DataTree {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: RwLock::new(None),
        }
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The whole tree. A missing directory is an empty object.
    pub fn tree(&self) -> Result<Arc<Value>> {
        let mtime = newest_mtime(&self.dir);
        if let Some(loaded) = &*self.loaded.read().unwrap_or_else(PoisonError::into_inner) {
            if loaded.mtime >= mtime {
                return Ok(Arc::clone(&loaded.tree));
            }
        }

        let tree = Arc::new(read_dir(&self.dir)?);
        debug!(dir = %self.dir.display(), mtime = mtime, "data tree loaded");
        *self.loaded.write().unwrap_or_else(PoisonError::into_inner) = Some(Loaded {
            mtime,
            tree: Arc::clone(&tree),
        });
        Ok(tree)
    }

    /// Node at `segments`, if any.
    pub fn get(&self, segments: &[&str]) -> Result<Option<Value>> {
        let tree = self.tree()?;
        Ok(get_path(&tree, segments).cloned())
    }
}

fn newest_mtime(dir: &Path) -> u64 {
    let mut newest = mtime_secs(dir).unwrap_or(0);
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            let mtime = if path.is_dir() {
                newest_mtime(&path)
            } else {
                mtime_secs(&path).unwrap_or(0)
            };
            newest = newest.max(mtime);
        }
    }
    newest
}

fn read_dir(dir: &Path) -> Result<Value> {
    let mut node = Map::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Value::Object(node)),
        Err(e) => return Err(e.into()),
    };

    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            let child = read_dir(&path)?;
            merge_node(&mut node, name, child);
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let text = fs::read_to_string(&path)?;
            let value: Value = serde_json::from_str(&text)
                .map_err(|e| Error::Internal(format!("{}: {}", path.display(), e)))?;
            merge_node(&mut node, stem, value);
        }
    }
    Ok(Value::Object(node))
}

/// `a.json` and directory `a/` share the key `a`; objects are merged.
fn merge_node(node: &mut Map<String, Value>, key: &str, value: Value) {
    match (node.get_mut(key), value) {
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            existing.extend(incoming);
        }
        (_, value) => {
            node.insert(key.to_string(), value);
        }
    }
}
