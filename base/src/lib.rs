use once_cell::sync::Lazy;
use std::env;

pub mod config;
pub mod datetime;
pub mod error;

pub static APP_NAME: &str = "runweaver";
pub static APP_WORKER_NAME: &str = "runweaver-worker";

/// Log filter directive used when RUST_LOG is not set.
pub static DEFAULT_LOG_FILTER: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILTER").unwrap_or_else(|_| "info".to_string()));
