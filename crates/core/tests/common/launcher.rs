//! Scripted launcher that replaces `uv` and the engine with shell scripts.

use async_trait::async_trait;
use mf_core::process::{LaunchSpec, Launcher, ProcessSpawner, ServiceProcess, SpawnError};
use std::sync::Mutex;

/// What the supervisor asked to launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchKind {
    EnvironmentCreation,
    DependencyInstall,
    Service,
}

impl LaunchKind {
    fn of(spec: &LaunchSpec) -> Self {
        match spec.args.first().map(String::as_str) {
            Some("venv") => LaunchKind::EnvironmentCreation,
            Some("pip") => LaunchKind::DependencyInstall,
            _ => LaunchKind::Service,
        }
    }
}

/// Runs `sh -c <script> sh <original args...>` instead of the real program.
///
/// The original arguments are available to the scripts as `$1`, `$2`, ...
/// so the environment-creation script can create the interpreter at `$2`.
pub struct ScriptedLauncher {
    pub venv_script: String,
    pub pip_script: String,
    pub service_script: String,
    launches: Mutex<Vec<LaunchKind>>,
}

impl ScriptedLauncher {
    /// Environment creation and dependency installation succeed; the service
    /// runs `service_script`.
    pub fn new(service_script: impl Into<String>) -> Self {
        Self {
            venv_script: r#"mkdir -p "$2/bin" && touch "$2/bin/python" && echo "Using CPython 3.12""#
                .to_string(),
            pip_script: "echo 'Resolved 2 packages'; echo 'Installed 2 packages'".to_string(),
            service_script: service_script.into(),
            launches: Mutex::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub fn with_pip_script(mut self, script: impl Into<String>) -> Self {
        self.pip_script = script.into();
        self
    }

    pub fn count(&self, kind: LaunchKind) -> usize {
        self.launches
            .lock()
            .unwrap()
            .iter()
            .filter(|k| **k == kind)
            .count()
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ServiceProcess, SpawnError> {
        let kind = LaunchKind::of(spec);
        self.launches.lock().unwrap().push(kind);

        let script = match kind {
            LaunchKind::EnvironmentCreation => &self.venv_script,
            LaunchKind::DependencyInstall => &self.pip_script,
            LaunchKind::Service => &self.service_script,
        };
        let scripted = LaunchSpec::new("sh")
            .args(["-c", script.as_str(), "sh"])
            .args(spec.args.iter().cloned())
            .envs(spec.env.clone());

        ProcessSpawner::start(&scripted)
    }
}
