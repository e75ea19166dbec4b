//! Presentation (screen-share) machine
//!
//! A presentation cannot outlive its call: `CALL.ENDED` and `CALL.FAILED` are
//! observed here and force the machine back to idle or failed.

use serde::{Deserialize, Serialize};

use super::{MachineDefinition, SessionEvent, Step};
use crate::error::FailureInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresentationStatus {
    Idle,
    Starting,
    Active,
    Stopping,
    Failed,
}

impl PresentationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Starting | Self::Active | Self::Stopping)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationSnapshot {
    pub status: PresentationStatus,
    pub error: Option<FailureInfo>,
}

impl PresentationSnapshot {
    fn with_status(&self, status: PresentationStatus) -> Self {
        Self {
            status,
            error: self.error.clone(),
        }
    }

    fn failed(error: &FailureInfo) -> Self {
        Self {
            status: PresentationStatus::Failed,
            error: Some(error.clone()),
        }
    }
}

pub struct PresentationMachine;

impl MachineDefinition for PresentationMachine {
    type State = PresentationSnapshot;

    const NAME: &'static str = "presentation";

    fn initial() -> PresentationSnapshot {
        PresentationSnapshot {
            status: PresentationStatus::Idle,
            error: None,
        }
    }

    fn step(state: &PresentationSnapshot, event: &SessionEvent) -> Step<PresentationSnapshot> {
        use PresentationStatus::*;

        let status = state.status;
        match event {
            SessionEvent::ScreenStarting => match status {
                Idle | Failed => Step::Next(PresentationSnapshot {
                    status: Starting,
                    error: None,
                }),
                _ => Step::Invalid,
            },
            SessionEvent::ScreenStarted => match status {
                Starting => Step::Next(state.with_status(Active)),
                _ => Step::Invalid,
            },
            SessionEvent::ScreenEnding => match status {
                Starting | Active => Step::Next(state.with_status(Stopping)),
                _ => Step::Invalid,
            },
            SessionEvent::ScreenEnded => match status {
                Starting | Active | Stopping | Failed => Step::Next(Self::initial()),
                Idle => Step::Invalid,
            },
            SessionEvent::ScreenFailed { error } => {
                if status.is_in_progress() {
                    Step::Next(PresentationSnapshot::failed(error))
                } else {
                    Step::Invalid
                }
            }
            SessionEvent::ScreenReset => Step::Next(Self::initial()),
            SessionEvent::CallEnded if status != Idle => Step::Next(Self::initial()),
            SessionEvent::CallFailed { error } if status.is_in_progress() => {
                Step::Next(PresentationSnapshot::failed(error))
            }
            _ => Step::Unhandled,
        }
    }

    fn status_name(state: &PresentationSnapshot) -> &'static str {
        state.status.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machines::StateMachine;

    fn active() -> StateMachine<PresentationMachine> {
        let mut m = StateMachine::<PresentationMachine>::new();
        m.send(&SessionEvent::ScreenStarting);
        m.send(&SessionEvent::ScreenStarted);
        assert_eq!(m.state().status, PresentationStatus::Active);
        m
    }

    #[test]
    fn test_full_cycle() {
        let mut m = active();
        m.send(&SessionEvent::ScreenEnding);
        assert_eq!(m.state().status, PresentationStatus::Stopping);
        m.send(&SessionEvent::ScreenEnded);
        assert_eq!(m.state().status, PresentationStatus::Idle);
    }

    #[test]
    fn test_failure_and_restart_clears_error() {
        let mut m = active();
        m.send(&SessionEvent::ScreenFailed {
            error: FailureInfo::new("track stopped"),
        });
        assert_eq!(m.state().status, PresentationStatus::Failed);
        assert!(m.state().error.is_some());

        m.send(&SessionEvent::ScreenStarting);
        assert_eq!(m.state().status, PresentationStatus::Starting);
        assert!(m.state().error.is_none());
    }

    #[test]
    fn test_call_end_forces_idle() {
        for extra in [vec![], vec![SessionEvent::ScreenEnding]] {
            let mut m = active();
            for event in &extra {
                m.send(event);
            }
            assert!(m.send(&SessionEvent::CallEnded));
            assert_eq!(m.state().status, PresentationStatus::Idle);
        }

        let mut idle = StateMachine::<PresentationMachine>::new();
        assert!(!idle.send(&SessionEvent::CallEnded));
    }

    #[test]
    fn test_call_failure_forces_failed() {
        let mut m = StateMachine::<PresentationMachine>::new();
        m.send(&SessionEvent::ScreenStarting);
        m.send(&SessionEvent::CallFailed {
            error: FailureInfo::new("Request Terminated").with_status(487),
        });
        assert_eq!(m.state().status, PresentationStatus::Failed);
        assert_eq!(m.state().error.as_ref().unwrap().status_code, Some(487));
    }

    #[test]
    fn test_return_to_idle_drops_failure() {
        let failure = SessionEvent::ScreenFailed {
            error: FailureInfo::new("track stopped"),
        };
        for end in [SessionEvent::ScreenEnded, SessionEvent::CallEnded] {
            let mut m = active();
            m.send(&failure);
            assert!(m.state().error.is_some());

            assert!(m.send(&end));
            assert_eq!(m.state(), &PresentationMachine::initial());
        }
    }

    #[test]
    fn test_invalid_events() {
        let mut m = StateMachine::<PresentationMachine>::new();
        assert!(!m.send(&SessionEvent::ScreenStarted));
        assert!(!m.send(&SessionEvent::ScreenEnded));
        assert!(!m.send(&SessionEvent::ScreenFailed {
            error: FailureInfo::new("late"),
        }));
        assert_eq!(m.state(), &PresentationMachine::initial());
    }
}
