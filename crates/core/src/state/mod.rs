//! Lifecycle state of the computation service.
//!
//! This module provides:
//! - The `Phase` state machine and its transition table
//! - `LifecycleState`, the observable owner of the current phase and port

pub mod lifecycle;

pub use lifecycle::{Applied, LifecycleState, Phase, Snapshot, Transition, TransitionError};
