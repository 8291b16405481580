//! Serialization of session launches against the single receiver session.
//!
//! At most one launch is in flight and at most one session is active. A
//! request that arrives while the coordinator is busy is parked as the pending
//! request; a newer arrival replaces it and the replaced request is told it was
//! cancelled. A running session is stopped before its replacement starts.

use std::sync::Arc;

use log::{info, warn};
use uuid::Uuid;

use crate::error::LaunchError;
use crate::receiver_session::SharedSession;

/// Identifies one accepted launch attempt.
pub type LaunchId = Uuid;

/// Observer of one launch request's outcome.
pub trait SessionListener: Send + Sync {
    fn on_session_starting(&self, launch_id: LaunchId);
    fn on_session_started(&self, session: &SharedSession);
    fn on_session_start_failed(&self);
    fn on_session_ended(&self);
    /// The request was superseded before it was started.
    fn on_cancelled(&self);
}

/// Everything needed to start one session.
pub trait LaunchRequest: Send {
    /// Begins the asynchronous launch. The outcome must be reported back to
    /// the coordinator tagged with `launch_id`.
    fn start(&mut self, launch_id: LaunchId);

    fn session_listener(&self) -> Arc<dyn SessionListener>;
}

struct QueuedLaunch {
    id: LaunchId,
    request: Box<dyn LaunchRequest>,
}

enum LaunchState {
    Idle,
    Launching(QueuedLaunch),
    Running {
        session: SharedSession,
        listener: Arc<dyn SessionListener>,
    },
    Stopping {
        session: SharedSession,
        listener: Arc<dyn SessionListener>,
    },
}

/// Observable phase of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPhase {
    Idle,
    Launching,
    Running,
    Stopping,
}

impl LaunchPhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Launching => "launching",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

pub struct SessionLaunchCoordinator {
    state: LaunchState,
    pending: Option<QueuedLaunch>,
}

impl Default for SessionLaunchCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLaunchCoordinator {
    pub fn new() -> Self {
        Self {
            state: LaunchState::Idle,
            pending: None,
        }
    }

    pub fn phase(&self) -> LaunchPhase {
        phase_of(&self.state)
    }

    pub fn current_session(&self) -> Option<SharedSession> {
        match &self.state {
            LaunchState::Running { session, .. } | LaunchState::Stopping { session, .. } => {
                Some(Arc::clone(session))
            }
            LaunchState::Idle | LaunchState::Launching(_) => None,
        }
    }

    pub fn launching_id(&self) -> Option<LaunchId> {
        match &self.state {
            LaunchState::Launching(launch) => Some(launch.id),
            _ => None,
        }
    }

    pub fn pending_id(&self) -> Option<LaunchId> {
        self.pending.as_ref().map(|launch| launch.id)
    }

    /// Accepts a launch request and returns the id its outcome will carry.
    pub fn request_launch(&mut self, request: Box<dyn LaunchRequest>) -> LaunchId {
        let launch = QueuedLaunch {
            id: Uuid::new_v4(),
            request,
        };
        let launch_id = launch.id;
        match std::mem::replace(&mut self.state, LaunchState::Idle) {
            LaunchState::Idle => self.start_launch(launch),
            LaunchState::Running { session, listener } => {
                info!(
                    "LaunchCoordinator: stopping session {} for launch {}",
                    session.session_id(),
                    launch_id
                );
                self.state = LaunchState::Stopping {
                    session: Arc::clone(&session),
                    listener,
                };
                self.queue_pending(launch);
                session.stop();
            }
            busy @ (LaunchState::Launching(_) | LaunchState::Stopping { .. }) => {
                self.state = busy;
                self.queue_pending(launch);
            }
        }
        launch_id
    }

    pub fn on_session_started(
        &mut self,
        launch_id: LaunchId,
        session: SharedSession,
    ) -> Result<(), LaunchError> {
        let launch = self.take_launching("session started", launch_id)?;
        let listener = launch.request.session_listener();
        info!(
            "LaunchCoordinator: launch {} started session {}",
            launch_id,
            session.session_id()
        );
        self.state = LaunchState::Running {
            session: Arc::clone(&session),
            listener: Arc::clone(&listener),
        };
        // A pending request stays parked; it is not promoted here.
        listener.on_session_started(&session);
        Ok(())
    }

    pub fn on_session_start_failed(&mut self, launch_id: LaunchId) -> Result<(), LaunchError> {
        let launch = self.take_launching("session start failure", launch_id)?;
        warn!("LaunchCoordinator: launch {} failed to start", launch_id);
        self.state = LaunchState::Idle;
        launch.request.session_listener().on_session_start_failed();
        self.start_pending();
        Ok(())
    }

    pub fn on_session_ended(&mut self) -> Result<(), LaunchError> {
        let listener = match std::mem::replace(&mut self.state, LaunchState::Idle) {
            LaunchState::Running { session, listener }
            | LaunchState::Stopping { session, listener } => {
                info!("LaunchCoordinator: session {} ended", session.session_id());
                listener
            }
            other => {
                let phase = phase_of(&other);
                self.state = other;
                warn!(
                    "LaunchCoordinator: ignoring session end while {}",
                    phase.as_str()
                );
                return Err(LaunchError::UnexpectedTransition {
                    event: "session ended",
                    state: phase.as_str(),
                });
            }
        };
        listener.on_session_ended();
        self.start_pending();
        Ok(())
    }

    fn take_launching(
        &mut self,
        event: &'static str,
        launch_id: LaunchId,
    ) -> Result<QueuedLaunch, LaunchError> {
        match std::mem::replace(&mut self.state, LaunchState::Idle) {
            LaunchState::Launching(launch) if launch.id == launch_id => Ok(launch),
            LaunchState::Launching(launch) => {
                self.state = LaunchState::Launching(launch);
                warn!(
                    "LaunchCoordinator: ignoring {} for stale launch {}",
                    event, launch_id
                );
                Err(LaunchError::StaleCompletion(launch_id))
            }
            other => {
                let phase = phase_of(&other);
                self.state = other;
                warn!(
                    "LaunchCoordinator: ignoring {} for launch {} while {}",
                    event,
                    launch_id,
                    phase.as_str()
                );
                Err(LaunchError::UnexpectedTransition {
                    event,
                    state: phase.as_str(),
                })
            }
        }
    }

    fn start_pending(&mut self) {
        if let Some(launch) = self.pending.take() {
            self.start_launch(launch);
        }
    }

    fn start_launch(&mut self, launch: QueuedLaunch) {
        let launch_id = launch.id;
        let listener = launch.request.session_listener();
        info!("LaunchCoordinator: starting launch {}", launch_id);
        self.state = LaunchState::Launching(launch);
        listener.on_session_starting(launch_id);
        if let LaunchState::Launching(launch) = &mut self.state {
            launch.request.start(launch_id);
        }
    }

    fn queue_pending(&mut self, launch: QueuedLaunch) {
        let launch_id = launch.id;
        if let Some(replaced) = self.pending.replace(launch) {
            info!(
                "LaunchCoordinator: launch {} superseded by {}",
                replaced.id, launch_id
            );
            replaced.request.session_listener().on_cancelled();
        }
    }
}

fn phase_of(state: &LaunchState) -> LaunchPhase {
    match state {
        LaunchState::Idle => LaunchPhase::Idle,
        LaunchState::Launching(_) => LaunchPhase::Launching,
        LaunchState::Running { .. } => LaunchPhase::Running,
        LaunchState::Stopping { .. } => LaunchPhase::Stopping,
    }
}
