//! OS process spawner.
//!
//! Every child is started with piped stdout/stderr and a background monitor
//! task that owns the `tokio::process::Child`. The monitor is the only place
//! that waits on the child; everyone else observes the exit through an
//! `ExitWatch`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, watch};

/// Everything needed to start one child process.
///
/// `env` is merged onto the inherited environment; it never replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
            env: BTreeMap::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }
}

impl fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, absent when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ExitReport {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitReport {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Cloneable observer of a child's exit.
#[derive(Debug, Clone)]
pub struct ExitWatch {
    rx: watch::Receiver<Option<ExitReport>>,
}

impl ExitWatch {
    /// A fresh watch and the sender that reports into it.
    pub(crate) fn channel() -> (watch::Sender<Option<ExitReport>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }

    /// The exit report, if the process has already exited.
    pub fn current(&self) -> Option<ExitReport> {
        *self.rx.borrow()
    }

    /// Wait for the process to exit. Cancel safe.
    pub async fn wait(&mut self) -> ExitReport {
        loop {
            if let Some(report) = *self.rx.borrow_and_update() {
                return report;
            }
            if self.rx.changed().await.is_err() {
                // Monitor task is gone without reporting (runtime shutdown).
                return self.current().unwrap_or(ExitReport { code: None });
            }
        }
    }
}

/// Owned handle of one spawned child process.
///
/// Dropping the handle of a live process terminates it.
#[derive(Debug)]
pub struct ServiceProcess {
    pid: Option<u32>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    signals: mpsc::UnboundedSender<StopSignal>,
    exit: ExitWatch,
}

/// Requests forwarded to the monitor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopSignal {
    Terminate,
    Kill,
}

impl ServiceProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    pub fn exit_watch(&self) -> ExitWatch {
        self.exit.clone()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.current().is_some()
    }

    /// Ask the process to terminate (SIGTERM on Unix). Returns immediately;
    /// the exit is reported through the `ExitWatch`.
    pub fn stop(&self) {
        let _ = self.signals.send(StopSignal::Terminate);
    }

    /// Kill the process outright. Returns immediately.
    pub fn kill(&self) {
        let _ = self.signals.send(StopSignal::Kill);
    }

    /// Wait for the process to exit.
    pub async fn wait(&mut self) -> ExitReport {
        self.exit.wait().await
    }
}

/// Starts child processes.
///
/// This is the seam the supervisor and the installer spawn through, so tests
/// can substitute scripted children.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ServiceProcess, SpawnError>;
}

/// `Launcher` backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSpawner;

impl ProcessSpawner {
    /// Spawn the process described by `spec`.
    ///
    /// Must be called from within a tokio runtime: the exit monitor is a
    /// spawned task.
    pub fn start(spec: &LaunchSpec) -> Result<ServiceProcess, SpawnError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.envs(&spec.env);
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| SpawnError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (signals, signal_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit) = ExitWatch::channel();

        tracing::debug!(pid, command = %spec, "spawned child process");
        tokio::spawn(monitor(child, signal_rx, exit_tx));

        Ok(ServiceProcess {
            pid,
            stdout,
            stderr,
            signals,
            exit,
        })
    }
}

#[async_trait]
impl Launcher for ProcessSpawner {
    async fn launch(&self, spec: &LaunchSpec) -> Result<ServiceProcess, SpawnError> {
        Self::start(spec)
    }
}

/// Waits on the child until it exits, relaying stop requests.
///
/// A dropped `ServiceProcess` counts as a kill request.
async fn monitor(
    mut child: Child,
    mut signals: mpsc::UnboundedReceiver<StopSignal>,
    exit_tx: watch::Sender<Option<ExitReport>>,
) {
    let pid = child.id();
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            signal = signals.recv() => match signal {
                Some(StopSignal::Terminate) => terminate(&mut child),
                Some(StopSignal::Kill) | None => {
                    if let Err(e) = child.start_kill() {
                        tracing::debug!(pid, error = %e, "kill request on exited process");
                    }
                    break child.wait().await;
                }
            },
        }
    };

    let report = match status {
        Ok(status) => ExitReport::from(status),
        Err(e) => {
            tracing::warn!(pid, error = %e, "failed to wait on child process");
            ExitReport { code: None }
        }
    };
    tracing::debug!(pid, %report, "child process exited");
    exit_tx.send_replace(Some(report));
}

/// SIGTERM on Unix, a plain kill elsewhere.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            // SAFETY: `pid` is our own child, not yet reaped by `wait`.
            if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
                return;
            }
        }
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!(pid = child.id(), error = %e, "terminate request on exited process");
    }
}
