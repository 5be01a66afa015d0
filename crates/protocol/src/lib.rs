//! # mf-protocol
//!
//! Shared data models for the MathFormer calculator supervisor.
//!
//! This crate defines the structures used for:
//! - The loopback HTTP calculation protocol spoken by the computation service
//! - Supervisor settings loaded from `config.toml`
//! - Communication between a UI shell and the supervisor
//!
//! ## Modules
//!
//! - [`calc_models`]: Calculation requests and service replies
//! - [`config_models`]: Supervisor settings
//! - [`lifecycle_models`]: UI-visible lifecycle status
//! - [`ipc`]: Operations, replies and events for UI-supervisor communication
//!
//! ## Design Principles
//!
//! - Minimal dependencies: serde, ts-rs, uuid and chrono only
//! - TypeScript generation: all types derive `TS` for the UI shell
//! - Independent compilation: no dependencies on other workspace crates

pub mod calc_models;
pub mod config_models;
pub mod ipc;
pub mod lifecycle_models;

// Re-export all public types for convenience
pub use calc_models::*;
pub use config_models::*;
pub use ipc::*;
pub use lifecycle_models::*;
