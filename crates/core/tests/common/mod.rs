//! Common test utilities for supervisor integration tests.
//!
//! This module provides:
//! - Test fixtures (configurations, installed homes, service scripts)
//! - A scripted launcher standing in for `uv` and the engine

pub mod fixtures;
pub mod launcher;

pub use fixtures::*;
pub use launcher::*;
