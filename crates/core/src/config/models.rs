//! Resolved supervisor configuration.
//!
//! `AppConfig` binds the raw `SupervisorSettings` to a home directory and
//! derives everything the supervisor needs from them: environment paths,
//! the three launch commands and the timing knobs.

use crate::process::LaunchSpec;
use mf_protocol::config_models::SupervisorSettings;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the file written into the environment once an install reached
/// readiness.
pub const INSTALL_MARKER: &str = ".mathformer-installed";

/// Supervisor configuration rooted at a home directory.
///
/// # Example
///
/// ```rust,no_run
/// use mf_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("/tmp/mathformer")).await?;
/// println!("environment lives in {}", config.env_dir().display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding `config.toml`; relative settings resolve against it.
    pub home: PathBuf,

    /// Settings as read from `config.toml`.
    pub settings: SupervisorSettings,
}

impl AppConfig {
    pub fn new(home: impl Into<PathBuf>, settings: SupervisorSettings) -> Self {
        Self {
            home: home.into(),
            settings,
        }
    }

    /// Configuration with default settings.
    pub fn with_defaults(home: impl Into<PathBuf>) -> Self {
        Self::new(home, SupervisorSettings::default())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.home.join(path)
        }
    }

    /// The isolated runtime environment directory.
    pub fn env_dir(&self) -> PathBuf {
        self.resolve(&self.settings.env_dir)
    }

    /// Interpreter inside the runtime environment.
    pub fn env_python(&self) -> PathBuf {
        let env_dir = self.env_dir();
        if cfg!(windows) {
            env_dir.join("Scripts").join("python.exe")
        } else {
            env_dir.join("bin").join("python")
        }
    }

    pub fn install_marker(&self) -> PathBuf {
        self.env_dir().join(INSTALL_MARKER)
    }

    pub fn server_script(&self) -> PathBuf {
        self.resolve(&self.settings.server_script)
    }

    /// `uv venv <env-dir> [--python <version>]`
    pub fn env_creation_spec(&self, uv: &Path) -> LaunchSpec {
        let mut args = vec![
            "venv".to_string(),
            self.env_dir().to_string_lossy().into_owned(),
        ];
        if let Some(version) = &self.settings.python_version {
            args.push("--python".to_string());
            args.push(version.clone());
        }

        LaunchSpec::new(uv)
            .args(args)
            .workdir(&self.home)
            .envs(self.settings.env.clone())
    }

    /// `uv pip install --python <env-python> <deps...>` with the CPU-only
    /// index added as an extra index so large numeric packages resolve to
    /// their CPU builds.
    pub fn dependency_install_spec(&self, uv: &Path) -> LaunchSpec {
        let mut args = vec![
            "pip".to_string(),
            "install".to_string(),
            "--python".to_string(),
            self.env_python().to_string_lossy().into_owned(),
        ];
        args.extend(self.settings.dependencies.iter().cloned());
        args.extend([
            "--extra-index-url".to_string(),
            self.settings.cpu_index_url.clone(),
            "--index-strategy".to_string(),
            "unsafe-best-match".to_string(),
        ]);

        LaunchSpec::new(uv)
            .args(args)
            .workdir(&self.home)
            .envs(self.settings.env.clone())
    }

    /// `<env-python> <server-script> 0`: the service binds a free port and
    /// announces it on stdout.
    pub fn service_spec(&self) -> LaunchSpec {
        let script = self.server_script();
        let workdir = script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.home.clone());

        let mut spec = LaunchSpec::new(self.env_python())
            .args([script.to_string_lossy().into_owned(), "0".to_string()])
            .workdir(workdir)
            .envs(self.settings.env.clone())
            .env("PYTHONUNBUFFERED", "1");
        if let Some(mode) = &self.settings.backend_mode {
            spec = spec.env("MATHFORMER_BACKEND", mode.clone());
        }
        spec
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.settings.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.request_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.startup_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.settings.shutdown_grace_ms)
    }
}
