//! tokio_mvc - a small MVC web framework on Rust and Tokio.
//!
//! A site is a directory tree: TOML configuration in `cnf/`, public files in
//! `pub/`, JSON data and model rules in `dat/`, templates in `tpl/`. Requests
//! flow through the HTTP [`server`], the [`middleware`] chain and the
//! [`dispatcher`], which routes `METHOD:/path` to a [`controller`] through the
//! per-host [`environment`].
//!
//! # Features
//!
//! - **Routing**: wildcard route tables with best-match resolution
//! - **Response cache**: GET/HEAD responses cached per host with TTL jitter
//! - **Content negotiation**: JSON, CSV, XML and HTML from the same data
//! - **REST models**: validated, transcoded records over a [`model::Database`]
//! - **Events**: `rewrite`, `authorize`, `response`, `exception` hooks
//! - **Sessions and CSRF**: cache-backed sessions with per-route CSRF checks
//! - **Assets**: resized images, bundled and minified scripts and stylesheets
//! - **Utilities**: SVG line charts and MIME mail through sendmail
//!
//! # Example
//!
//! ```rust,ignore
//! use tokio_mvc::{app, config::Config, middleware, server::Server};
//!
//! let config = Config::from_env()?;
//! let dispatcher = app::build(&config.app)?;
//! let server = Server::bind(config.server, dispatcher, middleware::from_config(&config.middleware))?;
//! server.run().await?;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Full version string: "tokio_mvc/0.1.0"
pub const VERSION: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub mod app;
pub mod broker;
pub mod cache;
pub mod chart;
pub mod config;
pub mod container;
pub mod controller;
pub mod core;
pub mod data;
pub mod dispatcher;
pub mod environment;
pub mod export;
pub mod logging;
pub mod mail;
pub mod middleware;
pub mod model;
pub mod routing;
pub mod server;
pub mod session;
pub mod values;
pub mod view;

// Re-exports for convenience
pub use config::Config;
pub use dispatcher::Dispatcher;
pub use server::Server;
