//! Backend lifecycle status as seen by the UI.
//!
//! The supervisor tracks more than this internally (the bound port, the
//! process generation); none of that is exposed here.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Lifecycle status of the computation service.
///
/// Normal progression:
/// Uninstalled -> Installing -> Starting -> Verifying -> Ready
///
/// Special states:
/// - Failed: installation or startup failed; a new install may be requested
/// - Uninstalled is re-entered whenever the service process exits
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    /// No service process is running.
    Uninstalled,

    /// An installation session is provisioning the runtime environment.
    Installing,

    /// The service process has been spawned but has not announced its port.
    Starting,

    /// A port was announced; canary requests are being issued.
    Verifying,

    /// The service answered a canary request and accepts calculations.
    Ready,

    /// Installation or startup failed.
    Failed,
}

impl LifecycleStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}
