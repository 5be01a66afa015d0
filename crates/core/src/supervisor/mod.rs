//! The backend lifecycle supervisor.
//!
//! `Supervisor` owns the lifecycle state, the single live service process
//! and the single in-flight installation. It is the only writer of the
//! lifecycle state; the UI reads it through commands and `Event`s.
//!
//! # Example
//!
//! ```rust,no_run
//! use mf_core::config::load_config;
//! use mf_core::supervisor::Supervisor;
//! use mf_protocol::calc_models::Operation;
//! use std::path::Path;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config(Path::new("/tmp/mathformer")).await?;
//! let (events_tx, _events_rx) = mpsc::unbounded_channel();
//! let supervisor = Supervisor::new(config, events_tx)?;
//!
//! if supervisor.check_installed().await {
//!     supervisor.start().await?;
//! } else {
//!     supervisor.install().await?;
//! }
//! if supervisor.wait_ready(Duration::from_secs(60)).await {
//!     println!("{}", supervisor.calculate(Operation::Add, "2", "2").await?);
//! }
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod service;

use service::LaunchOrigin;

pub use error::StartError;

use chrono::Utc;
use mf_protocol::calc_models::Operation;
use mf_protocol::ipc::{ErrorKind, Event, Op, Reply};
use mf_protocol::lifecycle_models::LifecycleStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::install::{provision, InstallError};
use crate::process::{Launcher, ProcessSpawner, ServiceProcess};
use crate::router::{CalculationError, RequestRouter, ServiceClient};
use crate::state::{Applied, LifecycleState, Phase, Transition, TransitionError};

type InstallOutcome = Option<Result<(), InstallError>>;

/// The live service process and the tasks bound to its generation.
struct ServiceSlot {
    generation: u64,
    process: ServiceProcess,
    tasks: Vec<JoinHandle<()>>,
    observer: JoinHandle<()>,
}

/// The installation every concurrent `install()` call shares.
struct InstallFlight {
    outcome: watch::Receiver<InstallOutcome>,
    task: JoinHandle<()>,
}

struct Inner {
    config: AppConfig,
    state: LifecycleState,
    launcher: Arc<dyn Launcher>,
    router: RequestRouter,
    events_tx: mpsc::UnboundedSender<Event>,
    generations: AtomicU64,
    service: Mutex<Option<ServiceSlot>>,
    install: Mutex<Option<InstallFlight>>,
}

/// Cloneable handle to the supervisor.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Supervisor that spawns real OS processes.
    ///
    /// # Errors
    ///
    /// `StartError::HttpClient` if the HTTP client cannot be built.
    pub fn new(
        config: AppConfig,
        events_tx: mpsc::UnboundedSender<Event>,
    ) -> Result<Self, StartError> {
        Self::with_launcher(config, Arc::new(ProcessSpawner), events_tx)
    }

    /// Supervisor that spawns through `launcher`.
    ///
    /// # Errors
    ///
    /// `StartError::HttpClient` if the HTTP client cannot be built.
    pub fn with_launcher(
        config: AppConfig,
        launcher: Arc<dyn Launcher>,
        events_tx: mpsc::UnboundedSender<Event>,
    ) -> Result<Self, StartError> {
        let client = ServiceClient::new(config.request_timeout())
            .map_err(|e| StartError::HttpClient(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: LifecycleState::new(),
                launcher,
                router: RequestRouter::new(client),
                events_tx,
                generations: AtomicU64::new(0),
                service: Mutex::new(None),
                install: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Read access to the lifecycle state, e.g. to subscribe to changes.
    pub fn state(&self) -> &LifecycleState {
        &self.inner.state
    }

    pub fn status(&self) -> LifecycleStatus {
        self.inner.state.status()
    }

    pub fn check_ready(&self) -> bool {
        self.inner.state.is_ready()
    }

    /// True once an installation has reached readiness and the environment's
    /// interpreter is still present.
    pub async fn check_installed(&self) -> bool {
        let exists = |path: std::path::PathBuf| async move {
            tokio::fs::try_exists(path).await.unwrap_or(false)
        };
        exists(self.inner.config.install_marker()).await
            && exists(self.inner.config.env_python()).await
    }

    /// Start the installed service without reinstalling.
    ///
    /// Returns as soon as the process is running; readiness is reported
    /// through events, `check_ready` and `wait_ready`. Starting a service that
    /// is already running is a no-op.
    ///
    /// # Errors
    ///
    /// - `NotInstalled` if `check_installed` is false
    /// - `InvalidState` while an installation is running
    /// - `Launch` if the process cannot be spawned
    pub async fn start(&self) -> Result<(), StartError> {
        match self.inner.state.snapshot().phase {
            Phase::Starting | Phase::Verifying | Phase::Ready { .. } => return Ok(()),
            Phase::Installing => return Err(StartError::InvalidState(LifecycleStatus::Installing)),
            Phase::Uninstalled | Phase::Failed { .. } => {}
        }
        if !self.check_installed().await {
            return Err(StartError::NotInstalled);
        }

        match self.inner.launch_service(LaunchOrigin::Boot).await {
            Ok(_) => Ok(()),
            // Lost a race against another start; that one owns the process.
            Err(StartError::InvalidState(status)) if status != LifecycleStatus::Installing => Ok(()),
            Err(e) => {
                if let StartError::Launch(reason) = &e {
                    let _ = self.inner.apply(Transition::Failed {
                        reason: reason.clone(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Install the environment, start the service and wait until it answers.
    ///
    /// Concurrent calls share one installation and its outcome. While a
    /// service is already starting, waits for it instead; when it is ready,
    /// returns immediately.
    ///
    /// # Errors
    ///
    /// The `InstallError` of the stage that failed, or `Aborted` if
    /// `shutdown` cancelled the installation.
    pub async fn install(&self) -> Result<(), InstallError> {
        let mut outcome = {
            let mut flight = self.inner.install.lock().await;
            let in_flight = flight
                .as_ref()
                .filter(|current| current.outcome.borrow().is_none())
                .map(|current| current.outcome.clone());

            match in_flight {
                Some(outcome) => outcome,
                None => match self.request_install().await {
                    Ok(_) => {
                        let (tx, rx) = watch::channel(None);
                        let inner = self.inner.clone();
                        let task = tokio::spawn(async move {
                            let result = inner.run_install().await;
                            tx.send_replace(Some(result));
                        });
                        *flight = Some(InstallFlight {
                            outcome: rx.clone(),
                            task,
                        });
                        rx
                    }
                    Err(_) => {
                        drop(flight);
                        return self.join_running_service().await;
                    }
                },
            }
        };

        let settled = match outcome.wait_for(Option::is_some).await {
            Ok(result) => (*result).clone().unwrap_or(Err(InstallError::Aborted)),
            Err(_) => Err(InstallError::Aborted),
        };
        settled
    }

    /// Enter `Installing`, serialized with service launches so a concurrent
    /// `start()` cannot slip a process in behind it.
    async fn request_install(&self) -> Result<Applied, TransitionError> {
        let _slot = self.inner.service.lock().await;
        self.inner.apply(Transition::InstallRequested)
    }

    /// `install()` when a service process already exists.
    async fn join_running_service(&self) -> Result<(), InstallError> {
        let snapshot = self.inner.state.snapshot();
        match snapshot.phase {
            Phase::Ready { .. } => Ok(()),
            Phase::Starting | Phase::Verifying => {
                match self.inner.state.wait_settled(snapshot.generation).await {
                    Some(_) => Ok(()),
                    None => Err(InstallError::ServiceExitedBeforeReady(format!(
                        "generation {}",
                        snapshot.generation
                    ))),
                }
            }
            other => Err(InstallError::InvalidState(format!("{:?}", other.status()))),
        }
    }

    /// Wait at most `timeout` for the service to become ready.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.inner.state.wait_ready())
            .await
            .is_ok()
    }

    /// Run a calculation on the ready service.
    ///
    /// # Errors
    ///
    /// See [`RequestRouter::calculate`].
    pub async fn calculate(
        &self,
        operation: Operation,
        a: &str,
        b: &str,
    ) -> Result<String, CalculationError> {
        self.inner
            .router
            .calculate(&self.inner.state, operation, a, b)
            .await
    }

    /// Cancel any installation, stop the service and wait for it to exit,
    /// bounded by the shutdown grace period.
    pub async fn shutdown(&self) {
        let grace = self.inner.config.shutdown_grace();

        if let Some(flight) = self.inner.install.lock().await.take() {
            if flight.outcome.borrow().is_none() {
                tracing::info!("aborting installation in flight");
                flight.task.abort();
                let _ = flight.task.await;
            }
        }
        if matches!(self.inner.state.snapshot().phase, Phase::Installing) {
            let _ = self.inner.apply(Transition::Failed {
                reason: "installation aborted".to_string(),
            });
        }

        let slot = self.inner.service.lock().await.take();
        if let Some(mut slot) = slot {
            tracing::info!(generation = slot.generation, "stopping computation service");
            for task in &slot.tasks {
                task.abort();
            }
            slot.process.stop();
            if tokio::time::timeout(grace, slot.process.wait()).await.is_err() {
                tracing::warn!(
                    generation = slot.generation,
                    "computation service ignored termination, killing it"
                );
                slot.process.kill();
                if tokio::time::timeout(grace, slot.process.wait()).await.is_err() {
                    tracing::warn!(generation = slot.generation, "computation service did not exit");
                }
            }
            let _ = tokio::time::timeout(grace, slot.observer).await;
        }
    }

    /// Execute one UI command.
    pub async fn dispatch(&self, op: Op) -> Reply {
        match op {
            Op::CheckInstalled => Reply::Installed {
                installed: self.check_installed().await,
            },
            Op::CheckReady => Reply::Ready {
                ready: self.check_ready(),
            },
            Op::GetStatus => Reply::Status {
                status: self.status(),
            },
            Op::Install => match self.install().await {
                Ok(()) => Reply::Done,
                Err(e) => error_reply(e.kind(), &e),
            },
            Op::StartBackend => match self.start().await {
                Ok(()) => Reply::Done,
                Err(e) => error_reply(e.kind(), &e),
            },
            Op::WaitReady { timeout_ms } => Reply::Ready {
                ready: self.wait_ready(Duration::from_millis(timeout_ms)).await,
            },
            Op::Calculate { operation, a, b } => match self.calculate(operation, &a, &b).await {
                Ok(result) => Reply::Value { result },
                Err(e) => error_reply(e.kind(), &e),
            },
            Op::Shutdown => {
                self.shutdown().await;
                Reply::Done
            }
        }
    }
}

fn error_reply(kind: ErrorKind, error: &dyn std::error::Error) -> Reply {
    Reply::Error {
        kind,
        message: error.to_string(),
    }
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Apply a transition, log it and announce readiness flips.
    fn apply(&self, transition: Transition) -> Result<Applied, TransitionError> {
        let applied = self.state.apply(transition)?;
        tracing::info!(
            from = ?applied.from.status(),
            to = ?applied.to.status(),
            generation = self.state.generation(),
            "lifecycle transition"
        );
        if applied.readiness_changed() {
            let _ = self.events_tx.send(Event::ReadinessChanged {
                ready: applied.to.is_ready(),
            });
        }
        Ok(applied)
    }

    async fn run_install(self: Arc<Self>) -> Result<(), InstallError> {
        let session_id = Uuid::new_v4();
        let span = tracing::info_span!("install", session = %session_id);
        async move { self.install_session(session_id).await }
            .instrument(span)
            .await
    }

    async fn install_session(self: &Arc<Self>, session_id: Uuid) -> Result<(), InstallError> {
        tracing::info!("installation started");
        let _ = self.events_tx.send(Event::InstallStarted {
            session_id,
            started_at: Utc::now(),
        });
        let log = |line: String| {
            tracing::debug!(line = %line, "install output");
            let _ = self.events_tx.send(Event::InstallLog { session_id, line });
        };

        let mut progress = provision(self.config.clone(), self.launcher.clone());
        while let Some(item) = progress.next().await {
            match item {
                Ok(line) => log(line),
                Err(e) => return self.fail_install(session_id, e),
            }
        }

        log("Starting computation service".to_string());
        let (generation, exit) = match self.launch_service(LaunchOrigin::Install).await {
            Ok(launched) => launched,
            Err(e) => {
                return self.fail_install(session_id, InstallError::ServiceStartFailed(e.to_string()))
            }
        };

        if self.state.wait_settled(generation).await.is_none() {
            let detail = exit
                .current()
                .map(|report| report.to_string())
                .unwrap_or_else(|| "superseded".to_string());
            let err = InstallError::ServiceExitedBeforeReady(detail);
            tracing::warn!(error = %err, "installation failed");
            let _ = self.events_tx.send(Event::InstallFailed {
                session_id,
                kind: err.kind(),
                message: err.to_string(),
            });
            return Err(err);
        }

        let marker = self.config.install_marker();
        let stamp = format!("{session_id} {}\n", Utc::now().to_rfc3339());
        if let Err(e) = tokio::fs::write(&marker, stamp).await {
            tracing::warn!(path = %marker.display(), error = %e, "failed to write install marker");
        }

        tracing::info!("installation complete");
        let _ = self.events_tx.send(Event::InstallComplete { session_id });
        Ok(())
    }

    fn fail_install(&self, session_id: Uuid, err: InstallError) -> Result<(), InstallError> {
        tracing::warn!(error = %err, "installation failed");
        if let Err(e) = self.apply(Transition::Failed {
            reason: err.to_string(),
        }) {
            tracing::debug!(error = %e, "failure not recorded in lifecycle state");
        }
        let _ = self.events_tx.send(Event::InstallFailed {
            session_id,
            kind: err.kind(),
            message: err.to_string(),
        });
        Err(err)
    }
}
