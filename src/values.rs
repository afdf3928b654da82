//! Nested value trees with key-path access.
//!
//! [`Values`] wraps a `serde_json::Value` and addresses nested entries by a
//! key path: either a dotted string (`"session.cookie_name"`) or a slice of
//! segments. Array elements are addressed by their numeric index.
//!
//! A tree can be frozen; writes to a frozen tree fail with
//! [`Error::Immutable`]. Site configuration is handed out frozen.

use serde_json::{Map, Value};

use crate::core::{Error, Result};

/// Something that can be split into key-path segments.
pub trait KeyPath {
    /// Path segments, outermost first.
    fn segments(&self) -> Vec<&str>;

    /// Dotted representation for error messages.
    fn display(&self) -> String {
        self.segments().join(".")
    }
}

impl KeyPath for str {
    fn segments(&self) -> Vec<&str> {
        self.split('.').filter(|s| !s.is_empty()).collect()
    }
}

impl KeyPath for String {
    fn segments(&self) -> Vec<&str> {
        self.as_str().segments()
    }
}

impl KeyPath for [&str] {
    fn segments(&self) -> Vec<&str> {
        self.to_vec()
    }
}

impl<const N: usize> KeyPath for [&str; N] {
    fn segments(&self) -> Vec<&str> {
        self.to_vec()
    }
}

impl KeyPath for [String] {
    fn segments(&self) -> Vec<&str> {
        self.iter().map(String::as_str).collect()
    }
}

impl KeyPath for Vec<String> {
    fn segments(&self) -> Vec<&str> {
        self.as_slice().segments()
    }
}

impl KeyPath for Vec<&str> {
    fn segments(&self) -> Vec<&str> {
        self.clone()
    }
}

/// Look up a nested value.
pub fn get_path<'a>(root: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(*segment),
        Value::Array(list) => segment.parse::<usize>().ok().and_then(|i| list.get(i)),
        _ => None,
    })
}

/// Set a nested value, creating intermediate objects as needed.
///
/// Non-object intermediates are replaced by objects.
pub fn set_path(root: &mut Value, segments: &[&str], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = value;
        return;
    };

    let mut node = root;
    for segment in parents {
        node = object_mut(node)
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    object_mut(node).insert((*last).to_string(), value);
}

/// Remove a nested value, returning it.
pub fn remove_path(root: &mut Value, segments: &[&str]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;

    let mut node = root;
    for segment in parents {
        node = match node {
            Value::Object(map) => map.get_mut(*segment)?,
            Value::Array(list) => list.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    match node {
        Value::Object(map) => map.remove(*last),
        Value::Array(list) => {
            let index = last.parse::<usize>().ok()?;
            (index < list.len()).then(|| list.remove(index))
        }
        _ => None,
    }
}

/// Deep-merge `overlay` into `base`.
///
/// Objects merge key by key; any other overlay value replaces the base value.
pub fn override_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => override_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Loose truthiness used for configuration flags.
///
/// `null`, `false`, `0`, `""`, `"0"`, `"false"`, `[]` and `{}` are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
        Value::Array(list) => !list.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Render a scalar as a plain string (strings unquoted, null empty).
pub fn to_plain_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn object_mut(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced by an object"),
    }
}

/// A value tree with key-path accessors and an optional immutable flag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Values {
    root: Value,
    immutable: bool,
}

impl Values {
    /// Create an empty, mutable tree.
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
            immutable: false,
        }
    }

    /// Borrow the underlying value.
    #[inline]
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Take the underlying value.
    #[inline]
    pub fn into_inner(self) -> Value {
        self.root
    }

    /// Make the tree read-only.
    pub fn freeze(mut self) -> Self {
        self.immutable = true;
        self
    }

    #[inline]
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    pub fn get<P: KeyPath + ?Sized>(&self, path: &P) -> Option<&Value> {
        get_path(&self.root, &path.segments())
    }

    pub fn get_or<P: KeyPath + ?Sized>(&self, path: &P, default: Value) -> Value {
        self.get(path).cloned().unwrap_or(default)
    }

    pub fn has<P: KeyPath + ?Sized>(&self, path: &P) -> bool {
        self.get(path).is_some()
    }

    /// String at `path`; numbers and booleans are rendered.
    pub fn get_str<P: KeyPath + ?Sized>(&self, path: &P) -> Option<String> {
        match self.get(path)? {
            Value::Null | Value::Array(_) | Value::Object(_) => None,
            scalar => Some(to_plain_string(scalar)),
        }
    }

    /// Integer at `path`; numeric strings are parsed.
    pub fn get_i64<P: KeyPath + ?Sized>(&self, path: &P) -> Option<i64> {
        match self.get(path)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Truthiness of the value at `path` (missing is false).
    pub fn get_bool<P: KeyPath + ?Sized>(&self, path: &P) -> bool {
        self.get(path).map(is_truthy).unwrap_or(false)
    }

    pub fn set<P: KeyPath + ?Sized>(&mut self, path: &P, value: Value) -> Result<()> {
        if self.immutable {
            return Err(Error::Immutable(path.display()));
        }
        set_path(&mut self.root, &path.segments(), value);
        Ok(())
    }

    pub fn remove<P: KeyPath + ?Sized>(&mut self, path: &P) -> Result<Option<Value>> {
        if self.immutable {
            return Err(Error::Immutable(path.display()));
        }
        Ok(remove_path(&mut self.root, &path.segments()))
    }

    /// Deep-merge another tree over this one.
    pub fn merge(&mut self, overlay: Value) -> Result<()> {
        if self.immutable {
            return Err(Error::Immutable(String::new()));
        }
        override_values(&mut self.root, overlay);
        Ok(())
    }
}

impl From<Value> for Values {
    fn from(root: Value) -> Self {
        Self {
            root,
            immutable: false,
        }
    }
}
