//! Service process launch and the tasks attached to one generation.
//!
//! Each launched process gets:
//! - a stdout task running port discovery inline
//! - a stderr task forwarding diagnostics
//! - a readiness task, spawned once the port is announced
//! - an exit observer, the only writer that demotes the lifecycle state

use mf_protocol::ipc::{Event, OutputStream};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio_stream::wrappers::SplitStream;
use tokio_stream::StreamExt;

use super::{Inner, ServiceSlot, StartError};
use crate::process::{ExitWatch, PortScanner, ScanItem};
use crate::readiness::{verify, Verification};
use crate::state::{Phase, Transition};

const READ_CHUNK: usize = 4096;

/// Who is launching the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LaunchOrigin {
    /// The last step of an installation session.
    Install,
    /// `start()` on an already installed environment.
    Boot,
}

impl LaunchOrigin {
    fn accepts(self, phase: &Phase) -> bool {
        match self {
            LaunchOrigin::Install => matches!(phase, Phase::Installing),
            LaunchOrigin::Boot => matches!(phase, Phase::Uninstalled | Phase::Failed { .. }),
        }
    }
}

impl Inner {
    /// Spawn the service and attach its tasks. Returns the new generation and
    /// an observer of its exit.
    ///
    /// The phase is checked against `origin` under the slot lock, which is
    /// also held while an installation is requested.
    pub(super) async fn launch_service(
        self: &Arc<Self>,
        origin: LaunchOrigin,
    ) -> Result<(u64, ExitWatch), StartError> {
        let mut slot = self.service.lock().await;

        let phase = self.state.snapshot().phase;
        if !origin.accepts(&phase) {
            return Err(StartError::InvalidState(phase.status()));
        }

        let spec = self.config.service_spec();
        let mut process = self
            .launcher
            .launch(&spec)
            .await
            .map_err(|e| StartError::Launch(e.to_string()))?;

        let generation = self.next_generation();
        if let Err(e) = self.apply(Transition::ProcessStarted { generation }) {
            process.kill();
            tracing::warn!(generation, error = %e, "service launched in an unexpected state");
            return Err(StartError::InvalidState(self.state.status()));
        }
        tracing::info!(generation, pid = process.pid(), command = %spec, "computation service started");

        let exit = process.exit_watch();
        let mut tasks = Vec::with_capacity(3);
        if let Some(stdout) = process.take_stdout() {
            tasks.push(tokio::spawn(scan_stdout(
                self.clone(),
                generation,
                stdout,
                exit.clone(),
            )));
        }
        if let Some(stderr) = process.take_stderr() {
            tasks.push(tokio::spawn(forward_stderr(self.clone(), generation, stderr)));
        }
        let observer = tokio::spawn(observe_exit(self.clone(), generation, exit.clone()));

        *slot = Some(ServiceSlot {
            generation,
            process,
            tasks,
            observer,
        });

        Ok((generation, exit))
    }

    fn emit_output(&self, generation: u64, stream: OutputStream, line: String) {
        tracing::debug!(generation, ?stream, line = %line, "service output");
        let _ = self.events_tx.send(Event::ServiceOutput { stream, line });
    }

    async fn spawn_verification(self: &Arc<Self>, generation: u64, port: u16, exit: ExitWatch) {
        let inner = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = verify(
                inner.router.client(),
                port,
                exit,
                inner.config.poll_interval(),
            )
            .await;

            match outcome {
                Verification::Ready => {
                    if let Err(e) = inner.apply(Transition::Verified { generation, port }) {
                        tracing::debug!(generation, error = %e, "verification result discarded");
                    }
                }
                Verification::ProcessExited(report) => {
                    tracing::info!(generation, port, %report, "verification abandoned");
                }
            }
        });

        let mut slot = self.service.lock().await;
        match slot.as_mut() {
            Some(current) if current.generation == generation => current.tasks.push(handle),
            _ => handle.abort(),
        }
    }
}

async fn scan_stdout(inner: Arc<Inner>, generation: u64, mut stdout: ChildStdout, exit: ExitWatch) {
    let mut scanner = PortScanner::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let (items, eof): (Vec<ScanItem>, bool) = match stdout.read(&mut buf).await {
            Ok(0) => (scanner.finish().into_iter().collect(), true),
            Ok(n) => (scanner.push(&buf[..n]), false),
            Err(e) => {
                tracing::debug!(generation, error = %e, "service stdout closed");
                (scanner.finish().into_iter().collect(), true)
            }
        };

        for item in items {
            match item {
                ScanItem::Port(port) => {
                    tracing::info!(generation, port, "service announced port");
                    match inner.apply(Transition::PortAnnounced { generation }) {
                        Ok(_) => {
                            inner
                                .spawn_verification(generation, port, exit.clone())
                                .await
                        }
                        Err(e) => {
                            tracing::debug!(generation, error = %e, "port announcement discarded")
                        }
                    }
                }
                ScanItem::Diagnostic(line) => {
                    inner.emit_output(generation, OutputStream::Stdout, line)
                }
            }
        }

        if eof {
            break;
        }
    }
}

async fn forward_stderr(inner: Arc<Inner>, generation: u64, stderr: ChildStderr) {
    let mut lines = SplitStream::new(BufReader::new(stderr).split(b'\n'));
    while let Some(Ok(raw)) = lines.next().await {
        let line = String::from_utf8_lossy(&raw);
        let line = line.strip_suffix('\r').unwrap_or(&*line);
        inner.emit_output(generation, OutputStream::Stderr, line.to_string());
    }
}

async fn observe_exit(inner: Arc<Inner>, generation: u64, mut exit: ExitWatch) {
    let report = exit.wait().await;
    tracing::info!(generation, %report, "computation service exited");

    if let Err(e) = inner.apply(Transition::ProcessExited { generation }) {
        tracing::debug!(generation, error = %e, "exit of superseded process");
    }

    let mut slot = inner.service.lock().await;
    if slot.as_ref().is_some_and(|s| s.generation == generation) {
        *slot = None;
    }
}
