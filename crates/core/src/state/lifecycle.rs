//! Lifecycle state machine of the computation service.
//!
//! ```text
//! Uninstalled --InstallRequested--> Installing --ProcessStarted--> Starting
//! Starting --PortAnnounced--> Verifying --Verified--> Ready{port}
//! Starting | Verifying | Ready --ProcessExited--> Uninstalled
//! Uninstalled | Failed --ProcessStarted--> Starting          (boot start)
//! any non-ready state --Failed--> Failed --InstallRequested--> Installing
//! ```
//!
//! Every transition goes through [`LifecycleState::apply`], which rejects
//! anything not in the table above. Transitions about a service process carry
//! its generation; a transition from an older process is rejected as stale.
//!
//! The ready port only exists inside `Phase::Ready`, so a reader can never
//! see a port without readiness or readiness without a port.

use mf_protocol::lifecycle_models::LifecycleStatus;
use thiserror::Error;
use tokio::sync::watch;

/// Current phase of the service lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Uninstalled,
    Installing,
    Starting,
    Verifying,
    Ready { port: u16 },
    Failed { reason: String },
}

impl Phase {
    pub fn status(&self) -> LifecycleStatus {
        match self {
            Phase::Uninstalled => LifecycleStatus::Uninstalled,
            Phase::Installing => LifecycleStatus::Installing,
            Phase::Starting => LifecycleStatus::Starting,
            Phase::Verifying => LifecycleStatus::Verifying,
            Phase::Ready { .. } => LifecycleStatus::Ready,
            Phase::Failed { .. } => LifecycleStatus::Failed,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Phase::Ready { port } => Some(*port),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Phase::Ready { .. })
    }

    /// A service process is alive in this phase.
    pub fn has_process(&self) -> bool {
        matches!(self, Phase::Starting | Phase::Verifying | Phase::Ready { .. })
    }
}

/// Phase plus the generation of the most recently started process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub phase: Phase,
    pub generation: u64,
}

/// A requested state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    InstallRequested,
    ProcessStarted { generation: u64 },
    PortAnnounced { generation: u64 },
    Verified { generation: u64, port: u16 },
    Failed { reason: String },
    ProcessExited { generation: u64 },
}

impl Transition {
    fn name(&self) -> &'static str {
        match self {
            Transition::InstallRequested => "InstallRequested",
            Transition::ProcessStarted { .. } => "ProcessStarted",
            Transition::PortAnnounced { .. } => "PortAnnounced",
            Transition::Verified { .. } => "Verified",
            Transition::Failed { .. } => "Failed",
            Transition::ProcessExited { .. } => "ProcessExited",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("{transition} is not allowed while {from:?}")]
    NotAllowed {
        from: LifecycleStatus,
        transition: &'static str,
    },

    #[error("{transition} for generation {got} is stale (current generation {current})")]
    StaleGeneration {
        transition: &'static str,
        current: u64,
        got: u64,
    },
}

/// Outcome of an applied transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub from: Phase,
    pub to: Phase,
}

impl Applied {
    /// Readiness flipped in either direction.
    pub fn readiness_changed(&self) -> bool {
        self.from.is_ready() != self.to.is_ready()
    }
}

/// Shared, observable lifecycle state.
///
/// Readers take snapshots or subscribe; only the supervisor applies
/// transitions.
#[derive(Debug)]
pub struct LifecycleState {
    tx: watch::Sender<Snapshot>,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot {
            phase: Phase::Uninstalled,
            generation: 0,
        });
        Self { tx }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> LifecycleStatus {
        self.tx.borrow().phase.status()
    }

    pub fn is_ready(&self) -> bool {
        self.tx.borrow().phase.is_ready()
    }

    /// The verified port, if the service is ready right now.
    pub fn ready_port(&self) -> Option<u16> {
        self.tx.borrow().phase.port()
    }

    pub fn generation(&self) -> u64 {
        self.tx.borrow().generation
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Wait until the process of `generation` is ready or gone.
    ///
    /// Returns the port if it became ready, `None` if it exited, failed, or
    /// was superseded by a newer process.
    pub async fn wait_settled(&self, generation: u64) -> Option<u16> {
        let mut rx = self.tx.subscribe();
        let settled = rx
            .wait_for(|s| {
                s.generation != generation || !matches!(s.phase, Phase::Starting | Phase::Verifying)
            })
            .await;

        match settled {
            Ok(snapshot) if snapshot.generation == generation => snapshot.phase.port(),
            _ => None,
        }
    }

    /// Wait until some process is ready and return its port.
    pub async fn wait_ready(&self) -> u16 {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(port) = rx.borrow_and_update().phase.port() {
                return port;
            }
            // The sender lives in `self`, so the channel cannot close here.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Apply `transition` atomically.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` if the transition is not allowed from the
    /// current phase or refers to a stale generation. The state is left
    /// untouched in that case.
    pub(crate) fn apply(&self, transition: Transition) -> Result<Applied, TransitionError> {
        // Overwritten by the closure, which always runs.
        let mut outcome = Err(TransitionError::NotAllowed {
            from: self.status(),
            transition: transition.name(),
        });
        self.tx.send_if_modified(|current| match next(current, &transition) {
            Ok(updated) => {
                let from = std::mem::replace(current, updated);
                outcome = Ok(Applied {
                    from: from.phase,
                    to: current.phase.clone(),
                });
                true
            }
            Err(err) => {
                outcome = Err(err);
                false
            }
        });

        outcome
    }
}

fn next(current: &Snapshot, transition: &Transition) -> Result<Snapshot, TransitionError> {
    let not_allowed = || TransitionError::NotAllowed {
        from: current.phase.status(),
        transition: transition.name(),
    };
    let stale = |got: u64| TransitionError::StaleGeneration {
        transition: transition.name(),
        current: current.generation,
        got,
    };
    let check_generation = |got: u64| {
        if got == current.generation {
            Ok(())
        } else {
            Err(stale(got))
        }
    };
    let with_phase = |phase: Phase| Snapshot {
        phase,
        generation: current.generation,
    };

    match (&current.phase, transition) {
        (Phase::Uninstalled | Phase::Failed { .. }, Transition::InstallRequested) => {
            Ok(with_phase(Phase::Installing))
        }

        (
            Phase::Uninstalled | Phase::Installing | Phase::Failed { .. },
            Transition::ProcessStarted { generation },
        ) => {
            if *generation <= current.generation {
                return Err(stale(*generation));
            }
            Ok(Snapshot {
                phase: Phase::Starting,
                generation: *generation,
            })
        }

        (Phase::Starting, Transition::PortAnnounced { generation }) => {
            check_generation(*generation)?;
            Ok(with_phase(Phase::Verifying))
        }

        (Phase::Verifying, Transition::Verified { generation, port }) => {
            check_generation(*generation)?;
            Ok(with_phase(Phase::Ready { port: *port }))
        }

        (
            Phase::Uninstalled | Phase::Installing | Phase::Starting | Phase::Verifying,
            Transition::Failed { reason },
        ) => Ok(with_phase(Phase::Failed {
            reason: reason.clone(),
        })),

        (
            Phase::Starting | Phase::Verifying | Phase::Ready { .. },
            Transition::ProcessExited { generation },
        ) => {
            check_generation(*generation)?;
            Ok(with_phase(Phase::Uninstalled))
        }

        // A transition about an older process is stale regardless of phase.
        (_, Transition::PortAnnounced { generation })
        | (_, Transition::Verified { generation, .. })
        | (_, Transition::ProcessExited { generation })
            if *generation != current.generation =>
        {
            Err(stale(*generation))
        }

        _ => Err(not_allowed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ready_state(generation: u64, port: u16) -> LifecycleState {
        let state = LifecycleState::new();
        state.apply(Transition::InstallRequested).unwrap();
        state
            .apply(Transition::ProcessStarted { generation })
            .unwrap();
        state.apply(Transition::PortAnnounced { generation }).unwrap();
        state.apply(Transition::Verified { generation, port }).unwrap();
        state
    }

    #[test]
    fn test_new_state_is_uninstalled() {
        let state = LifecycleState::new();

        assert_eq!(state.status(), LifecycleStatus::Uninstalled);
        assert!(!state.is_ready());
        assert_eq!(state.ready_port(), None);
        assert_eq!(state.generation(), 0);
    }

    #[test]
    fn test_install_path_reaches_ready_with_port() {
        let state = ready_state(1, 54321);

        assert_eq!(state.status(), LifecycleStatus::Ready);
        assert_eq!(state.ready_port(), Some(54321));
        assert_eq!(state.generation(), 1);
    }

    #[test]
    fn test_verified_only_from_verifying() {
        let state = LifecycleState::new();
        state.apply(Transition::InstallRequested).unwrap();
        state
            .apply(Transition::ProcessStarted { generation: 1 })
            .unwrap();

        let err = state
            .apply(Transition::Verified {
                generation: 1,
                port: 8000,
            })
            .unwrap_err();

        assert!(matches!(err, TransitionError::NotAllowed { .. }));
        assert_eq!(state.status(), LifecycleStatus::Starting);
        assert_eq!(state.ready_port(), None);
    }

    #[test]
    fn test_exit_clears_port_and_readiness_together() {
        let state = ready_state(1, 54321);

        let applied = state
            .apply(Transition::ProcessExited { generation: 1 })
            .unwrap();

        assert!(applied.readiness_changed());
        assert_eq!(state.status(), LifecycleStatus::Uninstalled);
        assert_eq!(state.ready_port(), None);
    }

    #[test]
    fn test_crash_while_verifying_never_reaches_ready() {
        let state = LifecycleState::new();
        state.apply(Transition::InstallRequested).unwrap();
        state
            .apply(Transition::ProcessStarted { generation: 1 })
            .unwrap();
        state
            .apply(Transition::PortAnnounced { generation: 1 })
            .unwrap();

        state
            .apply(Transition::ProcessExited { generation: 1 })
            .unwrap();
        let late = state.apply(Transition::Verified {
            generation: 1,
            port: 54321,
        });

        assert!(late.is_err());
        assert_eq!(state.status(), LifecycleStatus::Uninstalled);
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let state = ready_state(1, 9000);
        state
            .apply(Transition::ProcessExited { generation: 1 })
            .unwrap();
        state
            .apply(Transition::ProcessStarted { generation: 2 })
            .unwrap();

        let err = state
            .apply(Transition::ProcessExited { generation: 1 })
            .unwrap_err();

        assert!(matches!(
            err,
            TransitionError::StaleGeneration {
                current: 2,
                got: 1,
                ..
            }
        ));
        assert_eq!(state.status(), LifecycleStatus::Starting);
    }

    #[test]
    fn test_process_started_requires_newer_generation() {
        let state = LifecycleState::new();
        state
            .apply(Transition::ProcessStarted { generation: 3 })
            .unwrap();
        state
            .apply(Transition::ProcessExited { generation: 3 })
            .unwrap();

        let err = state
            .apply(Transition::ProcessStarted { generation: 3 })
            .unwrap_err();

        assert!(matches!(err, TransitionError::StaleGeneration { .. }));
    }

    #[test]
    fn test_failed_then_install_again() {
        let state = LifecycleState::new();
        state.apply(Transition::InstallRequested).unwrap();
        state
            .apply(Transition::Failed {
                reason: "exit code 1".to_string(),
            })
            .unwrap();
        assert_eq!(state.status(), LifecycleStatus::Failed);

        state.apply(Transition::InstallRequested).unwrap();

        assert_eq!(state.status(), LifecycleStatus::Installing);
    }

    #[test]
    fn test_ready_cannot_be_failed_or_reinstalled() {
        let state = ready_state(1, 9000);

        assert!(state
            .apply(Transition::Failed {
                reason: "boom".to_string()
            })
            .is_err());
        assert!(state.apply(Transition::InstallRequested).is_err());
        assert_eq!(state.ready_port(), Some(9000));
    }

    #[test]
    fn test_rejected_transition_does_not_notify() {
        let state = LifecycleState::new();
        let mut rx = state.subscribe();
        rx.borrow_and_update();

        let _ = state.apply(Transition::PortAnnounced { generation: 0 });

        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_wait_settled_reports_exit_as_none() {
        let state = std::sync::Arc::new(LifecycleState::new());
        state
            .apply(Transition::ProcessStarted { generation: 1 })
            .unwrap();

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_settled(1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        state
            .apply(Transition::ProcessExited { generation: 1 })
            .unwrap();

        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wait_ready_wakes_on_verification() {
        let state = std::sync::Arc::new(LifecycleState::new());
        state
            .apply(Transition::ProcessStarted { generation: 1 })
            .unwrap();

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_ready().await })
        };
        state
            .apply(Transition::PortAnnounced { generation: 1 })
            .unwrap();
        state
            .apply(Transition::Verified {
                generation: 1,
                port: 4242,
            })
            .unwrap();

        let port = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(port, 4242);
    }
}
