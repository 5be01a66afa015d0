//! Environment provisioning: parent directory, `uv venv`, `uv pip install`.
//!
//! Stages run strictly in order and the first failure ends the run. Starting
//! the service afterwards is the supervisor's job.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::{Stream, StreamExt};

use super::error::InstallError;
use super::stage::{run_stage, StageOutput};
use crate::config::AppConfig;
use crate::process::Launcher;

/// Number of output lines kept for a failure report.
const OUTPUT_TAIL_LINES: usize = 20;

/// Log lines of a provisioning run. A failure is the last item.
pub type InstallStream = Pin<Box<dyn Stream<Item = Result<String, InstallError>> + Send>>;

#[derive(Debug, Clone, Copy)]
enum Stage {
    EnvironmentCreation,
    DependencyInstall,
}

impl Stage {
    fn failure(self, reason: String, output: String) -> InstallError {
        match self {
            Stage::EnvironmentCreation => InstallError::EnvironmentCreationFailed { reason, output },
            Stage::DependencyInstall => InstallError::DependencyInstallFailed { reason, output },
        }
    }
}

/// Resolve the `uv` executable named in the settings.
///
/// # Errors
///
/// `EnvironmentCreationFailed` if it is neither a path to an executable nor
/// found on `PATH`.
pub fn locate_uv(uv: &str) -> Result<PathBuf, InstallError> {
    which::which(uv).map_err(|e| InstallError::EnvironmentCreationFailed {
        reason: format!("'{uv}' not found: {e}"),
        output: String::new(),
    })
}

/// Create the isolated environment and install the engine's dependencies.
///
/// Yields progress and installer output in order. On failure the last item
/// is the `InstallError`; on success the stream simply ends.
pub fn provision(config: AppConfig, launcher: Arc<dyn Launcher>) -> InstallStream {
    let stream = async_stream::stream! {
        let uv = match locate_uv(&config.settings.uv) {
            Ok(uv) => uv,
            Err(e) => {
                yield Err(e);
                return;
            }
        };

        let env_dir = config.env_dir();
        if let Some(parent) = env_dir.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                yield Err(Stage::EnvironmentCreation.failure(
                    format!("cannot create {}: {e}", parent.display()),
                    String::new(),
                ));
                return;
            }
        }

        let stages = [
            (
                Stage::EnvironmentCreation,
                format!("Creating runtime environment at {}", env_dir.display()),
                config.env_creation_spec(&uv),
            ),
            (
                Stage::DependencyInstall,
                format!("Installing {}", config.settings.dependencies.join(", ")),
                config.dependency_install_spec(&uv),
            ),
        ];

        for (stage, banner, spec) in stages {
            tracing::info!(?stage, command = %spec, "running install stage");
            yield Ok(banner);

            let mut tail: VecDeque<String> = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
            let mut exit = None;
            let mut output = run_stage(launcher.clone(), spec);

            while let Some(item) = output.next().await {
                match item {
                    Ok(StageOutput::Line(line)) => {
                        if tail.len() == OUTPUT_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line.clone());
                        yield Ok(line);
                    }
                    Ok(StageOutput::Exited(report)) => exit = Some(report),
                    Err(e) => {
                        yield Err(stage.failure(e.to_string(), String::new()));
                        return;
                    }
                }
            }

            let tail = Vec::from(tail).join("\n");
            match exit {
                Some(report) if report.success() => {}
                Some(report) => {
                    tracing::warn!(?stage, %report, "install stage failed");
                    yield Err(stage.failure(report.to_string(), tail));
                    return;
                }
                None => {
                    yield Err(stage.failure("exit status unavailable".to_string(), tail));
                    return;
                }
            }
        }
    };

    Box::pin(stream)
}
