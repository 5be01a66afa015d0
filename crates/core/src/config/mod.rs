//! Configuration loading and management.
//!
//! This module loads the supervisor settings from `<home>/config.toml` and
//! resolves them into the paths and launch commands the supervisor uses.

pub mod error;
pub mod loader;
pub mod models;

pub use error::{ConfigError, ConfigResult};
pub use loader::load_config;
pub use models::AppConfig;
