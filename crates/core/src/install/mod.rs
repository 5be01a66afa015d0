//! Installation of the isolated runtime environment.
//!
//! This module provides:
//! - `provision`, the sequential environment-creation and dependency-install
//!   run, exposed as a stream of log lines
//! - `run_stage`, the merged-output stream of a single installer process
//! - `InstallError`, the installation failure taxonomy

pub mod error;
pub mod provision;
pub mod stage;

pub use error::InstallError;
pub use provision::{locate_uv, provision, InstallStream};
pub use stage::{run_stage, StageOutput};
