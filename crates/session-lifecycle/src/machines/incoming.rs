//! Incoming-call machine: the ring and how it ended

use serde::{Deserialize, Serialize};

use super::{MachineDefinition, SessionEvent, Step};
use crate::events::CallerInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IncomingStatus {
    Idle,
    Ringing,
    Consumed,
    Declined,
    Terminated,
    Failed,
}

impl IncomingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Ringing => "ringing",
            Self::Consumed => "consumed",
            Self::Declined => "declined",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Consumed | Self::Declined | Self::Terminated | Self::Failed)
    }
}

/// How a ring ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IncomingTerminalReason {
    /// Answered by accepting the call
    Consumed,
    Declined,
    /// Caller hung up
    Terminated,
    Failed,
}

impl IncomingTerminalReason {
    fn status(self) -> IncomingStatus {
        match self {
            Self::Consumed => IncomingStatus::Consumed,
            Self::Declined => IncomingStatus::Declined,
            Self::Terminated => IncomingStatus::Terminated,
            Self::Failed => IncomingStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingSnapshot {
    pub status: IncomingStatus,
    /// Caller of the last ring; kept after the ring ends
    pub caller: Option<CallerInfo>,
    pub last_reason: Option<IncomingTerminalReason>,
}

impl IncomingSnapshot {
    fn finish(&self, reason: IncomingTerminalReason, caller: Option<&CallerInfo>) -> Self {
        Self {
            status: reason.status(),
            caller: caller.cloned().or_else(|| self.caller.clone()),
            last_reason: Some(reason),
        }
    }
}

pub struct IncomingMachine;

impl IncomingMachine {
    fn finish_ringing(
        state: &IncomingSnapshot,
        reason: IncomingTerminalReason,
        caller: Option<&CallerInfo>,
    ) -> Step<IncomingSnapshot> {
        if state.status == IncomingStatus::Ringing {
            Step::Next(state.finish(reason, caller))
        } else {
            Step::Invalid
        }
    }
}

impl MachineDefinition for IncomingMachine {
    type State = IncomingSnapshot;

    const NAME: &'static str = "incoming";

    fn initial() -> IncomingSnapshot {
        IncomingSnapshot {
            status: IncomingStatus::Idle,
            caller: None,
            last_reason: None,
        }
    }

    fn step(state: &IncomingSnapshot, event: &SessionEvent) -> Step<IncomingSnapshot> {
        use IncomingTerminalReason as Reason;

        match event {
            SessionEvent::IncomingRinging { caller } => Step::Next(IncomingSnapshot {
                status: IncomingStatus::Ringing,
                caller: Some(caller.clone()),
                last_reason: None,
            }),
            SessionEvent::IncomingConsumed => Self::finish_ringing(state, Reason::Consumed, None),
            SessionEvent::IncomingDeclined { caller } => {
                Self::finish_ringing(state, Reason::Declined, Some(caller))
            }
            SessionEvent::IncomingTerminated { caller } => {
                Self::finish_ringing(state, Reason::Terminated, Some(caller))
            }
            SessionEvent::IncomingFailed { caller } => {
                Self::finish_ringing(state, Reason::Failed, Some(caller))
            }
            SessionEvent::IncomingClear => Step::Next(Self::initial()),
            // Accepting the call answers the ring
            SessionEvent::CallAccepted | SessionEvent::CallConfirmed
                if state.status == IncomingStatus::Ringing =>
            {
                Step::Next(state.finish(Reason::Consumed, None))
            }
            _ => Step::Unhandled,
        }
    }

    fn status_name(state: &IncomingSnapshot) -> &'static str {
        state.status.as_str()
    }
}
