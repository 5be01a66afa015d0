//! # mf-core
//!
//! Backend lifecycle supervisor for the MathFormer calculator.
//!
//! This crate provides:
//! - Configuration loading from the supervisor home directory
//! - Spawning and supervising the external computation service
//! - Port discovery and readiness verification of that service
//! - Installation of its isolated runtime environment
//! - Routing of calculations to the verified service
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and management
//! - [`process`]: Child process spawning and port discovery
//! - [`state`]: Lifecycle state machine
//! - [`readiness`]: Canary-based readiness verification
//! - [`router`]: HTTP client and request routing
//! - [`install`]: Environment provisioning
//! - [`supervisor`]: The supervisor tying everything together

pub mod config;
pub mod install;
pub mod process;
pub mod readiness;
pub mod router;
pub mod state;
pub mod supervisor;

pub use supervisor::{StartError, Supervisor};
