use mf_protocol::ipc::ErrorKind;
use thiserror::Error;

/// Why an installation did not reach a ready service.
///
/// Stage failures carry the tail of the stage's combined output verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    #[error("Failed to create the runtime environment ({reason}){}", with_output(.output))]
    EnvironmentCreationFailed { reason: String, output: String },

    #[error("Failed to install dependencies ({reason}){}", with_output(.output))]
    DependencyInstallFailed { reason: String, output: String },

    #[error("Failed to start the computation service: {0}")]
    ServiceStartFailed(String),

    #[error("Computation service exited before becoming ready ({0})")]
    ServiceExitedBeforeReady(String),

    #[error("Installation is not possible while {0}")]
    InvalidState(String),

    #[error("Installation was aborted")]
    Aborted,
}

fn with_output(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(":\n{output}")
    }
}

impl InstallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::EnvironmentCreationFailed { .. } => ErrorKind::EnvironmentCreationFailed,
            InstallError::DependencyInstallFailed { .. } => ErrorKind::DependencyInstallFailed,
            InstallError::ServiceStartFailed(_) | InstallError::ServiceExitedBeforeReady(_) => {
                ErrorKind::ServiceStartFailed
            }
            InstallError::InvalidState(_) | InstallError::Aborted => ErrorKind::InvalidState,
        }
    }
}
