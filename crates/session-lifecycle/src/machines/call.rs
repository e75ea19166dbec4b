//! Call machine: status of the outgoing or answered call

use serde::{Deserialize, Serialize};

use super::{MachineDefinition, SessionEvent, Step};
use crate::error::FailureInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallStatus {
    Idle,
    Connecting,
    Ringing,
    Accepted,
    InCall,
    Ended,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Ringing => "ringing",
            Self::Accepted => "accepted",
            Self::InCall => "inCall",
            Self::Ended => "ended",
            Self::Failed => "failed",
        }
    }

    /// A call is being set up or is established
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Ringing | Self::Accepted | Self::InCall)
    }

    /// Idle or finished; a new call may start
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Idle | Self::Ended | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub status: CallStatus,
    pub error: Option<FailureInfo>,
}

impl CallSnapshot {
    fn active(status: CallStatus) -> Self {
        Self { status, error: None }
    }
}

pub struct CallMachine;

impl MachineDefinition for CallMachine {
    type State = CallSnapshot;

    const NAME: &'static str = "call";

    fn initial() -> CallSnapshot {
        CallSnapshot::active(CallStatus::Idle)
    }

    fn step(state: &CallSnapshot, event: &SessionEvent) -> Step<CallSnapshot> {
        use CallStatus::*;

        let status = state.status;
        match event {
            SessionEvent::CallConnecting => {
                if status.is_settled() {
                    Step::Next(CallSnapshot::active(Connecting))
                } else {
                    Step::Invalid
                }
            }
            SessionEvent::CallRinging => match status {
                Connecting | Ringing | Ended | Failed => Step::Next(CallSnapshot::active(Ringing)),
                _ => Step::Invalid,
            },
            // Idle -> accepted covers answering an incoming call
            SessionEvent::CallAccepted => match status {
                Idle | Connecting | Ringing | Ended | Failed => {
                    Step::Next(CallSnapshot::active(Accepted))
                }
                _ => Step::Invalid,
            },
            SessionEvent::CallConfirmed => match status {
                Connecting | Ringing | Accepted => Step::Next(CallSnapshot::active(InCall)),
                _ => Step::Invalid,
            },
            SessionEvent::CallEnded => {
                if status.is_active() {
                    Step::Next(CallSnapshot::active(Ended))
                } else {
                    Step::Invalid
                }
            }
            SessionEvent::CallFailed { error } => {
                if status.is_active() {
                    Step::Next(CallSnapshot {
                        status: Failed,
                        error: Some(error.clone()),
                    })
                } else {
                    Step::Invalid
                }
            }
            SessionEvent::CallReset => Step::Next(CallSnapshot::active(Idle)),
            _ => Step::Unhandled,
        }
    }

    fn status_name(state: &CallSnapshot) -> &'static str {
        state.status.as_str()
    }
}
