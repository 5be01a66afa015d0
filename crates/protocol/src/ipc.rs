//! Communication protocol between a UI shell and the supervisor.
//!
//! The protocol follows an Operation/Event pattern:
//! - `Op`: commands sent from the UI to the supervisor, each answered by
//!   exactly one `Reply`
//! - `Event`: unsolicited notifications (readiness, installation progress)
//!
//! Over the stdio bridge every message is one JSON line. Requests carry an
//! `id` that is echoed in the matching response:
//!
//! ```json
//! {"id": 7, "op": {"type": "calculate", "payload": {"operation": "add", "a": "1", "b": "2"}}}
//! {"id": 7, "reply": {"type": "value", "payload": {"result": "3"}}}
//! {"event": {"type": "readinessChanged", "payload": {"ready": true}}}
//! ```
//!
//! The port the computation service listens on is never part of this
//! protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::calc_models::Operation;
use crate::lifecycle_models::LifecycleStatus;

/// Operations sent from the UI to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Op {
    /// Is the runtime environment fully installed?
    CheckInstalled,

    /// Has the service answered a canary request?
    CheckReady,

    /// Current lifecycle status.
    GetStatus,

    /// Install the environment and start the service.
    ///
    /// Answered once the service is ready or the installation failed.
    /// Concurrent installs share one outcome.
    Install,

    /// Start an already installed service without waiting for readiness.
    StartBackend,

    /// Wait until the service is ready, at most `timeout_ms`.
    WaitReady { timeout_ms: u64 },

    /// Run a calculation on the ready service.
    Calculate {
        operation: Operation,
        a: String,
        b: String,
    },

    /// Stop the service and any installation in flight.
    Shutdown,
}

/// Classified failure reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Creating the isolated runtime environment failed.
    EnvironmentCreationFailed,
    /// Installing the engine's dependencies failed.
    DependencyInstallFailed,
    /// The service could not be launched or exited before becoming ready.
    ServiceStartFailed,
    /// A calculation was attempted before the service was ready.
    BackendNotReady,
    /// The service answered with a non-success HTTP status.
    ServiceError,
    /// The service reported a semantic error (e.g. division by zero).
    ComputationError,
    /// The service could not be reached.
    TransportError,
    /// The service answered with a body that is not part of the protocol.
    MalformedResponse,
    /// The command is not valid in the current lifecycle state.
    InvalidState,
}

/// Answer to a single `Op`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Reply {
    /// Answer to `CheckInstalled`.
    Installed { installed: bool },

    /// Answer to `CheckReady` and `WaitReady`.
    Ready { ready: bool },

    /// Answer to `GetStatus`.
    Status { status: LifecycleStatus },

    /// The command completed without a value (`Install`, `StartBackend`,
    /// `Shutdown`).
    Done,

    /// Result of a calculation, verbatim from the service.
    Value { result: String },

    /// The command failed.
    Error { kind: ErrorKind, message: String },
}

/// A correlated command from the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct Request {
    pub id: u64,
    pub op: Op,
}

/// The reply to the `Request` with the same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct Response {
    pub id: u64,
    pub reply: Reply,
}

/// Which standard stream of the service produced a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Events sent from the supervisor to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// The service became ready, or stopped being ready.
    ReadinessChanged { ready: bool },

    /// An installation session has begun.
    InstallStarted {
        #[ts(type = "string")]
        session_id: Uuid,
        #[ts(type = "string")]
        started_at: DateTime<Utc>,
    },

    /// One line of installation progress, in order.
    InstallLog {
        #[ts(type = "string")]
        session_id: Uuid,
        line: String,
    },

    /// The installation finished and the service answered.
    InstallComplete {
        #[ts(type = "string")]
        session_id: Uuid,
    },

    /// The installation failed; `message` carries the output tail.
    InstallFailed {
        #[ts(type = "string")]
        session_id: Uuid,
        kind: ErrorKind,
        message: String,
    },

    /// A diagnostic line written by the running service.
    ServiceOutput { stream: OutputStream, line: String },
}

/// Wrapper used on the stdio bridge to tell events apart from responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct EventEnvelope {
    pub event: Event,
}
