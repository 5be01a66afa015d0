use mf_protocol::ipc::ErrorKind;
use mf_protocol::lifecycle_models::LifecycleStatus;
use thiserror::Error;

/// Why the service could not be started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("The runtime environment is not installed")]
    NotInstalled,

    #[error("Cannot start the computation service while {0:?}")]
    InvalidState(LifecycleStatus),

    #[error("Failed to launch the computation service: {0}")]
    Launch(String),

    #[error("Failed to build the HTTP client: {0}")]
    HttpClient(String),
}

impl StartError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StartError::NotInstalled | StartError::InvalidState(_) => ErrorKind::InvalidState,
            StartError::Launch(_) | StartError::HttpClient(_) => ErrorKind::ServiceStartFailed,
        }
    }
}
