//! Child process management for the computation service.
//!
//! This module provides:
//! - The `Launcher` seam and its OS-backed implementation, `ProcessSpawner`
//! - `ServiceProcess`, the owned handle of one spawned child
//! - `PortScanner`, the line-protocol parser for the `PORT:<n>` announcement

pub mod port;
pub mod spawner;

pub use port::{parse_announcement, PortScanner, ScanItem};
pub use spawner::{
    ExitReport, ExitWatch, LaunchSpec, Launcher, ProcessSpawner, ServiceProcess, SpawnError,
};
