//! Named-entity dependency container.
//!
//! Classes are factories registered in code; entities are configured as
//! `"class:dependency:dependency"` strings (the `entities` table of the site
//! configuration). Dependencies are resolved through [`Container::get`], so
//! they are shared singletons.
//!
//! ```rust,ignore
//! container.register_class("memory_store", |_| Ok(Arc::new(MemoryStore::new())));
//! container.define("store", "memory_store");
//! let store: Arc<MemoryStore> = container.get("store")?;
//! ```

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::debug;

use crate::core::{Error, Result};

/// A built entity.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Builds an instance from its resolved dependencies, in declaration order.
pub type Factory = Arc<dyn Fn(&[Instance]) -> Result<Instance> + Send + Sync>;

#[derive(Default)]
pub struct Container {
    classes: RwLock<HashMap<String, Factory>>,
    entities: RwLock<HashMap<String, String>>,
    instances: RwLock<HashMap<String, Instance>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class factory.
    pub fn register_class<F>(&self, class: &str, factory: F)
    where
        F: Fn(&[Instance]) -> Result<Instance> + Send + Sync + 'static,
    {
        self.classes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(class.to_string(), Arc::new(factory));
    }

    /// Define (or redefine) an entity as `"class:dep:dep"`.
    pub fn define(&self, name: &str, definition: &str) {
        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), definition.to_string());
    }

    /// Define every entity of an `entities` table.
    pub fn define_all(&self, table: &Value) {
        if let Value::Object(map) = table {
            for (name, definition) in map {
                if let Some(definition) = definition.as_str() {
                    self.define(name, definition);
                }
            }
        }
    }

    /// Store a prebuilt singleton under `name`.
    pub fn insert<T: Any + Send + Sync>(&self, name: &str, instance: Arc<T>) {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), instance);
    }

    /// Whether `name` can be built: defined with a registered class, or prebuilt.
    pub fn acknowledge(&self, name: &str) -> bool {
        if self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
        {
            return true;
        }
        let Some(class) = self.class_of(name) else {
            return false;
        };
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&class)
    }

    /// Shared instance of `name`, built on first use.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        downcast(name, self.get_instance(name, &mut Vec::new())?)
    }

    /// Fresh instance of `name`. Dependencies are still shared.
    pub fn make<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        downcast(name, self.build(name, &mut Vec::new())?)
    }

    /// Check that `name` resolves to a `T`.
    pub fn validate<T: Any + Send + Sync>(&self, name: &str) -> Result<()> {
        self.get::<T>(name).map(|_| ())
    }

    fn class_of(&self, name: &str) -> Option<String> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .and_then(|d| d.split(':').next())
            .map(str::to_string)
    }

    fn get_instance(&self, name: &str, stack: &mut Vec<String>) -> Result<Instance> {
        if let Some(instance) = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(instance));
        }

        let instance = self.build(name, stack)?;
        let mut instances = self.instances.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have won the race; keep its instance.
        Ok(Arc::clone(
            instances.entry(name.to_string()).or_insert(instance),
        ))
    }

    fn build(&self, name: &str, stack: &mut Vec<String>) -> Result<Instance> {
        if stack.iter().any(|n| n == name) {
            stack.push(name.to_string());
            return Err(Error::Container(format!(
                "cyclic dependency: {}",
                stack.join(" -> ")
            )));
        }

        let definition = self
            .entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Container(format!("entity not found: {}", name)))?;

        let mut parts = definition.split(':').filter(|p| !p.is_empty());
        let class = parts
            .next()
            .ok_or_else(|| Error::Container(format!("entity must be something: {}", name)))?;
        let factory = self
            .classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(class)
            .cloned()
            .ok_or_else(|| Error::Container(format!("class not registered: {}", class)))?;

        stack.push(name.to_string());
        let dependencies = parts
            .map(|dep| self.get_instance(dep, stack))
            .collect::<Result<Vec<_>>>();
        stack.pop();

        debug!(entity = name, class = class, "building entity");
        factory(&dependencies?)
    }
}

fn downcast<T: Any + Send + Sync>(name: &str, instance: Instance) -> Result<Arc<T>> {
    instance.downcast::<T>().map_err(|_| {
        Error::Container(format!("entity {} must be a {}", name, type_name::<T>()))
    })
}

/// Downcast a dependency handed to a factory.
pub fn dependency<T: Any + Send + Sync>(deps: &[Instance], index: usize) -> Result<Arc<T>> {
    let instance = deps
        .get(index)
        .cloned()
        .ok_or_else(|| Error::Container(format!("missing dependency #{}", index)))?;
    downcast(&format!("#{}", index), instance)
}
