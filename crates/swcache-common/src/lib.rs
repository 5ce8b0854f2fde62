//! # swcache common
//!
//! Configuration and logging setup shared by the swcache crates.
//!
//! ## Features
//!
//! - `WorkerConfig`: every tunable of the precache worker, loadable from JSON
//! - Logging configuration and subscriber setup

pub mod config;
pub mod logging;

pub use config::{ConfigError, HttpConfig, WorkerConfig, CONFIG_ENV_VAR};
pub use logging::{init_logging, LogConfig, LogFormat};
