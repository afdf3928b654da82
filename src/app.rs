//! Application wiring.
//!
//! Shared services are entities of the dependency container, defined by the
//! `entities` table of the primary host's site configuration:
//!
//! | class             | builds                      | dependencies |
//! |-------------------|-----------------------------|--------------|
//! | `memory_store`    | `Arc<dyn CacheStore>`       |              |
//! | `cache`           | [`Cache`]                   | a store      |
//! | `memory_database` | `Arc<dyn Database>`         |              |
//! | `session_store`   | [`SessionStore`]            | a cache      |

use std::sync::Arc;

use tracing::info;

use crate::broker::Broker;
use crate::cache::{Cache, CacheStore, MemoryStore};
use crate::config::AppConfig;
use crate::container::{dependency, Container};
use crate::controller::ControllerRegistry;
use crate::core::Result;
use crate::dispatcher::Dispatcher;
use crate::environment::EnvironmentLoader;
use crate::model::{Database, MemoryDatabase};
use crate::session::SessionStore;

/// Container with the built-in classes registered.
pub fn container(config: &AppConfig) -> Container {
    let container = Container::new();

    let capacity = config.cache_capacity;
    container.register_class("memory_store", move |_| {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::with_capacity(capacity));
        Ok(Arc::new(store))
    });

    let namespace = config.cache_namespace.clone();
    let revision = config.cache_revision.clone();
    container.register_class("cache", move |deps| {
        let store = dependency::<Arc<dyn CacheStore>>(deps, 0)?;
        Ok(Arc::new(Cache::new(Arc::clone(&*store), &namespace, &revision)))
    });

    container.register_class("memory_database", |_| {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        Ok(Arc::new(db))
    });

    container.register_class("session_store", |deps| {
        Ok(Arc::new(SessionStore::new(dependency::<Cache>(deps, 0)?)))
    });

    container
}

/// Build the dispatcher for `config.root`.
pub fn build(config: &AppConfig) -> Result<Dispatcher> {
    // The entities table comes from the site configuration, which needs a
    // cache to load; read it once through a throwaway cache.
    let bootstrap = EnvironmentLoader::new(&config.root, Cache::in_memory());
    let primary = bootstrap.for_host(&config.primary_host)?;

    let container = container(config);
    if let Some(entities) = primary.get("entities") {
        container.define_all(entities);
    }

    let cache = container.get::<Cache>("cache")?;
    let database = container.get::<Arc<dyn Database>>("database")?;
    let sessions = container.get::<SessionStore>("session")?;

    let environments = EnvironmentLoader::new(&config.root, (*cache).clone());
    let primary_env = environments.for_host(&config.primary_host)?;
    let broker = Arc::new(Broker::from_environment(&primary_env)?);

    info!(
        root = %config.root.display(),
        host = %config.primary_host,
        "application built"
    );

    Ok(Dispatcher::new(
        environments,
        broker,
        Arc::clone(&*database),
        sessions,
        ControllerRegistry::with_defaults(),
    ))
}
