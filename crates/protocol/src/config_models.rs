//! Supervisor settings from `config.toml`.
//!
//! Every key is optional; a missing file or key falls back to the defaults
//! below.

use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use ts_rs::TS;

/// Default package index used for the CPU-only numeric dependency.
pub const DEFAULT_CPU_INDEX_URL: &str = "https://download.pytorch.org/whl/cpu";

/// Represents the settings in `<home>/config.toml`.
///
/// # Example
///
/// ```toml
/// env-dir = "venv"
/// python-version = "3.12"
/// dependencies = ["mathformer", "torch"]
/// backend-mode = "lite"
/// request-timeout-ms = 5000
///
/// [env]
/// OMP_NUM_THREADS = "2"
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, TS)]
#[serde(default, rename_all = "kebab-case")]
pub struct SupervisorSettings {
    /// Isolated runtime environment directory. Relative paths are resolved
    /// against the supervisor home.
    pub env_dir: PathBuf,

    /// The `uv` executable used to create the environment and install packages.
    pub uv: String,

    /// Interpreter version requested when creating the environment.
    pub python_version: Option<String>,

    /// Packages installed into the environment.
    pub dependencies: Vec<String>,

    /// Extra index carrying CPU-only builds of the numeric dependencies.
    pub cpu_index_url: String,

    /// Entry script of the computation service.
    pub server_script: PathBuf,

    /// Forwarded to the service as `MATHFORMER_BACKEND`.
    pub backend_mode: Option<String>,

    /// Extra environment variables merged onto the inherited environment of
    /// every child process.
    pub env: BTreeMap<String, String>,

    /// Interval between readiness canary requests.
    pub poll_interval_ms: u64,

    /// Upper bound on a single calculation request.
    pub request_timeout_ms: u64,

    /// Upper bound on interactive waits for the service to become ready.
    pub startup_timeout_ms: u64,

    /// Time allowed for the service to exit after shutdown is requested.
    pub shutdown_grace_ms: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            env_dir: PathBuf::from("venv"),
            uv: "uv".to_string(),
            python_version: Some("3.12".to_string()),
            dependencies: vec!["mathformer".to_string(), "torch".to_string()],
            cpu_index_url: DEFAULT_CPU_INDEX_URL.to_string(),
            server_script: PathBuf::from("engine/server.py"),
            backend_mode: None,
            env: BTreeMap::new(),
            poll_interval_ms: 500,
            request_timeout_ms: 5_000,
            startup_timeout_ms: 60_000,
            shutdown_grace_ms: 2_000,
        }
    }
}
