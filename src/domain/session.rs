//! Session Controller
//!
//! Tracks the start/pause/resume/stop lifecycle of the recording session on a
//! connected unit and produces the command frame for each transition. Device
//! lookup happens before the controller is consulted: a command for a device
//! that is not connected never reaches it.

use crate::domain::models::DeviceId;
use crate::domain::pages::{Command, SessionCommand};
use crate::domain::stopwatch::Stopwatch;
use crate::domain::trace::EmitTrigger;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Start,
    StartWithoutGnss,
    Pause,
    Resume,
    Stop,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {action:?} a session that is {state:?}")]
    InvalidTransition {
        state: SessionState,
        action: SessionAction,
    },
    #[error("session belongs to {owner}, not {requested}")]
    WrongDevice { owner: DeviceId, requested: DeviceId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub device: DeviceId,
    pub with_gnss: bool,
}

/// Point-in-time view of the session for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub id: Option<Uuid>,
    pub device: Option<DeviceId>,
    pub state: SessionState,
    pub elapsed_seconds: u64,
}

#[derive(Debug, Default)]
pub struct SessionController {
    session: Option<Session>,
    state: SessionState,
    stopwatch: Stopwatch,
}

impl SessionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Running | SessionState::Paused)
    }

    /// Trigger the aggregator should use for the current session.
    pub fn emit_trigger(&self) -> EmitTrigger {
        match &self.session {
            Some(session) if !session.with_gnss => EmitTrigger::SessionClock,
            _ => EmitTrigger::Gnss,
        }
    }

    pub fn elapsed_seconds(&self, now: Instant) -> u64 {
        self.stopwatch.elapsed_seconds(now)
    }

    pub fn is_ticking(&self) -> bool {
        self.stopwatch.is_ticking()
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            id: self.session.as_ref().map(|s| s.id),
            device: self.session.as_ref().map(|s| s.device.clone()),
            state: self.state,
            elapsed_seconds: self.elapsed_seconds(now),
        }
    }

    /// Apply a lifecycle action and return the command to send.
    pub fn apply(
        &mut self,
        device: &DeviceId,
        action: SessionAction,
        now: Instant,
    ) -> Result<Command, SessionError> {
        match action {
            SessionAction::Start => self.start(device, true, now),
            SessionAction::StartWithoutGnss => self.start(device, false, now),
            SessionAction::Pause => self.pause(device, now),
            SessionAction::Resume => self.resume(device, now),
            SessionAction::Stop => self.stop(device),
        }
    }

    fn start(
        &mut self,
        device: &DeviceId,
        with_gnss: bool,
        now: Instant,
    ) -> Result<Command, SessionError> {
        if self.is_active() {
            let action = if with_gnss {
                SessionAction::Start
            } else {
                SessionAction::StartWithoutGnss
            };
            return Err(self.invalid(action));
        }

        self.session = Some(Session {
            id: Uuid::new_v4(),
            device: device.clone(),
            with_gnss,
        });
        self.state = SessionState::Running;
        self.stopwatch.stop();
        self.stopwatch.start(now);

        let command = if with_gnss {
            SessionCommand::Start
        } else {
            SessionCommand::StartWithoutGnss
        };
        Ok(Command::Session(command))
    }

    fn pause(&mut self, device: &DeviceId, now: Instant) -> Result<Command, SessionError> {
        if self.state != SessionState::Running {
            return Err(self.invalid(SessionAction::Pause));
        }
        self.ensure_owner(device)?;

        self.stopwatch.pause(now);
        self.state = SessionState::Paused;
        Ok(Command::Session(SessionCommand::Pause))
    }

    fn resume(&mut self, device: &DeviceId, now: Instant) -> Result<Command, SessionError> {
        if self.state != SessionState::Paused {
            return Err(self.invalid(SessionAction::Resume));
        }
        self.ensure_owner(device)?;

        self.stopwatch.resume(now);
        self.state = SessionState::Running;
        Ok(Command::Session(SessionCommand::Resume))
    }

    fn stop(&mut self, device: &DeviceId) -> Result<Command, SessionError> {
        if !self.is_active() {
            return Err(self.invalid(SessionAction::Stop));
        }
        self.ensure_owner(device)?;

        self.session = None;
        self.stopwatch.stop();
        self.state = SessionState::Stopped;
        Ok(Command::Session(SessionCommand::Stop))
    }

    /// Hard reset after the session's device went away.
    pub fn reset(&mut self) {
        self.session = None;
        self.stopwatch.stop();
        self.state = SessionState::Idle;
    }

    /// Whether the session (if any) is bound to `device`.
    pub fn belongs_to(&self, device: &DeviceId) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| &session.device == device)
    }

    fn ensure_owner(&self, device: &DeviceId) -> Result<(), SessionError> {
        match &self.session {
            Some(session) if &session.device != device => Err(SessionError::WrongDevice {
                owner: session.device.clone(),
                requested: device.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn invalid(&self, action: SessionAction) -> SessionError {
        SessionError::InvalidTransition {
            state: self.state,
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn obu() -> DeviceId {
        DeviceId::from("obu-1")
    }

    #[test]
    fn test_full_lifecycle() {
        let t0 = Instant::now();
        let mut controller = SessionController::new();

        let cmd = controller.apply(&obu(), SessionAction::Start, t0).unwrap();
        assert_eq!(cmd, Command::Session(SessionCommand::Start));
        assert_eq!(controller.state(), SessionState::Running);
        assert!(controller.session().is_some());

        let cmd = controller
            .apply(&obu(), SessionAction::Pause, t0 + Duration::from_secs(4))
            .unwrap();
        assert_eq!(cmd, Command::Session(SessionCommand::Pause));
        assert_eq!(controller.elapsed_seconds(t0 + Duration::from_secs(50)), 4);

        let cmd = controller
            .apply(&obu(), SessionAction::Resume, t0 + Duration::from_secs(50))
            .unwrap();
        assert_eq!(cmd, Command::Session(SessionCommand::Resume));
        assert_eq!(controller.elapsed_seconds(t0 + Duration::from_secs(56)), 10);

        let cmd = controller
            .apply(&obu(), SessionAction::Stop, t0 + Duration::from_secs(60))
            .unwrap();
        assert_eq!(cmd, Command::Session(SessionCommand::Stop));
        assert_eq!(controller.state(), SessionState::Stopped);
        assert!(controller.session().is_none());
        assert_eq!(controller.elapsed_seconds(t0 + Duration::from_secs(70)), 0);

        // A stopped controller accepts a new start.
        assert!(controller
            .apply(&obu(), SessionAction::Start, t0 + Duration::from_secs(80))
            .is_ok());
    }

    #[test]
    fn test_start_without_gnss_switches_trigger() {
        let mut controller = SessionController::new();
        let cmd = controller
            .apply(&obu(), SessionAction::StartWithoutGnss, Instant::now())
            .unwrap();
        assert_eq!(cmd, Command::Session(SessionCommand::StartWithoutGnss));
        assert_eq!(controller.emit_trigger(), EmitTrigger::SessionClock);
    }

    #[test]
    fn test_invalid_transitions() {
        let now = Instant::now();
        let mut controller = SessionController::new();

        assert_eq!(
            controller.apply(&obu(), SessionAction::Pause, now),
            Err(SessionError::InvalidTransition {
                state: SessionState::Idle,
                action: SessionAction::Pause
            })
        );
        assert!(controller.apply(&obu(), SessionAction::Resume, now).is_err());
        assert!(controller.apply(&obu(), SessionAction::Stop, now).is_err());

        controller.apply(&obu(), SessionAction::Start, now).unwrap();
        assert!(controller.apply(&obu(), SessionAction::Start, now).is_err());
        assert!(controller.apply(&obu(), SessionAction::Resume, now).is_err());
    }

    #[test]
    fn test_other_device_cannot_drive_session() {
        let now = Instant::now();
        let mut controller = SessionController::new();
        controller.apply(&obu(), SessionAction::Start, now).unwrap();

        let other = DeviceId::from("obu-2");
        assert!(matches!(
            controller.apply(&other, SessionAction::Stop, now),
            Err(SessionError::WrongDevice { .. })
        ));
        assert_eq!(controller.state(), SessionState::Running);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let now = Instant::now();
        let mut controller = SessionController::new();
        controller.apply(&obu(), SessionAction::Start, now).unwrap();
        assert!(controller.belongs_to(&obu()));

        controller.reset();
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(controller.session().is_none());
        assert!(!controller.is_ticking());
        assert_eq!(controller.emit_trigger(), EmitTrigger::Gnss);
    }
}
