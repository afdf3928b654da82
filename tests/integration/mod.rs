//! Integration tests for tokio_mvc
//!
//! Each test starts the server in-process on an ephemeral port, over a
//! temporary site root (see `helpers::write_site`), and drives it with reqwest.
//!
//! Run with: cargo test --test integration

mod helpers;

mod data_formats;
mod error_pages;
mod http_basic;
mod rate_limiting;
mod rest_api;
mod shutdown;
