//! Connection machine: transport and registration status

use serde::{Deserialize, Serialize};

use super::{MachineDefinition, SessionEvent, Step};
use crate::error::FailureInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    /// Transport is up, handshake in progress, not yet registered
    Initializing,
    Connected,
    Registered,
    Disconnected,
    Failed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Initializing => "initializing",
            Self::Connected => "connected",
            Self::Registered => "registered",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }

    /// Transport established (registered or not)
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Registered)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Connecting | Self::Initializing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    pub error: Option<FailureInfo>,
}

impl ConnectionSnapshot {
    fn with_status(&self, status: ConnectionStatus) -> Self {
        Self {
            status,
            error: self.error.clone(),
        }
    }

    fn cleared(status: ConnectionStatus) -> Self {
        Self { status, error: None }
    }
}

pub struct ConnectionMachine;

impl MachineDefinition for ConnectionMachine {
    type State = ConnectionSnapshot;

    const NAME: &'static str = "connection";

    fn initial() -> ConnectionSnapshot {
        ConnectionSnapshot::cleared(ConnectionStatus::Idle)
    }

    fn step(state: &ConnectionSnapshot, event: &SessionEvent) -> Step<ConnectionSnapshot> {
        use ConnectionStatus::*;

        let status = state.status;
        match event {
            SessionEvent::ConnectionStart => match status {
                Idle | Connecting | Initializing | Disconnected | Failed => {
                    Step::Next(ConnectionSnapshot::cleared(Connecting))
                }
                Connected | Registered => Step::Invalid,
            },
            SessionEvent::ConnectionInit => match status {
                Connecting => Step::Next(state.with_status(Initializing)),
                _ => Step::Invalid,
            },
            SessionEvent::ConnectionConnected => match status {
                Connecting | Initializing => Step::Next(state.with_status(Connected)),
                _ => Step::Invalid,
            },
            SessionEvent::ConnectionRegistered => match status {
                Connected | Registered => Step::Next(state.with_status(Registered)),
                _ => Step::Invalid,
            },
            SessionEvent::ConnectionUnregistered => match status {
                Registered | Connected => Step::Next(state.with_status(Connected)),
                _ => Step::Invalid,
            },
            SessionEvent::ConnectionDisconnected => match status {
                Idle => Step::Invalid,
                _ => Step::Next(state.with_status(Disconnected)),
            },
            SessionEvent::ConnectionFailed { error } => match status {
                Idle => Step::Invalid,
                _ => Step::Next(ConnectionSnapshot {
                    status: Failed,
                    error: Some(error.clone()),
                }),
            },
            SessionEvent::ConnectionReset => Step::Next(ConnectionSnapshot::cleared(Idle)),
            _ => Step::Unhandled,
        }
    }

    fn status_name(state: &ConnectionSnapshot) -> &'static str {
        state.status.as_str()
    }
}
