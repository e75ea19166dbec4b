//! Domain state machines
//!
//! Four independent machines (connection, call, incoming call, presentation)
//! share one closed event vocabulary, [`SessionEvent`]. Every machine sees
//! every event; ownership is expressed only by each machine's transition
//! function:
//!
//! * an event from the machine's own domain with no transition for the
//!   current state is *invalid*: the state is kept and a warning is logged;
//! * an event from another domain is either *observed* (a cross-domain
//!   transition such as an accepted call consuming the incoming ring) or
//!   silently *unhandled*.
//!
//! Transition functions are pure `(state, event) -> Step<state>`; the
//! [`StateMachine`] holder applies them and does the logging.

pub mod call;
pub mod connection;
pub mod incoming;
pub mod presentation;

use std::fmt;

use tracing::{debug, warn};

use crate::error::FailureInfo;
use crate::events::CallerInfo;

pub use call::{CallMachine, CallSnapshot, CallStatus};
pub use connection::{ConnectionMachine, ConnectionSnapshot, ConnectionStatus};
pub use incoming::{IncomingMachine, IncomingSnapshot, IncomingStatus, IncomingTerminalReason};
pub use presentation::{PresentationMachine, PresentationSnapshot, PresentationStatus};

/// Which machine owns an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Connection,
    Call,
    Incoming,
    Presentation,
}

/// Closed event vocabulary consumed by the domain machines
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectionStart,
    ConnectionInit,
    ConnectionConnected,
    ConnectionRegistered,
    ConnectionUnregistered,
    ConnectionDisconnected,
    ConnectionFailed { error: FailureInfo },
    ConnectionReset,

    CallConnecting,
    CallRinging,
    CallAccepted,
    CallConfirmed,
    CallEnded,
    CallFailed { error: FailureInfo },
    CallReset,

    IncomingRinging { caller: CallerInfo },
    IncomingConsumed,
    IncomingDeclined { caller: CallerInfo },
    IncomingTerminated { caller: CallerInfo },
    IncomingFailed { caller: CallerInfo },
    IncomingClear,

    ScreenStarting,
    ScreenStarted,
    ScreenEnding,
    ScreenEnded,
    ScreenFailed { error: FailureInfo },
    ScreenReset,
}

impl SessionEvent {
    pub fn domain(&self) -> Domain {
        use SessionEvent::*;
        match self {
            ConnectionStart
            | ConnectionInit
            | ConnectionConnected
            | ConnectionRegistered
            | ConnectionUnregistered
            | ConnectionDisconnected
            | ConnectionFailed { .. }
            | ConnectionReset => Domain::Connection,
            CallConnecting | CallRinging | CallAccepted | CallConfirmed | CallEnded
            | CallFailed { .. } | CallReset => Domain::Call,
            IncomingRinging { .. }
            | IncomingConsumed
            | IncomingDeclined { .. }
            | IncomingTerminated { .. }
            | IncomingFailed { .. }
            | IncomingClear => Domain::Incoming,
            ScreenStarting | ScreenStarted | ScreenEnding | ScreenEnded | ScreenFailed { .. }
            | ScreenReset => Domain::Presentation,
        }
    }

    /// Dotted event name, e.g. `CALL.ACCEPTED`
    pub fn name(&self) -> &'static str {
        use SessionEvent::*;
        match self {
            ConnectionStart => "CONNECTION.START",
            ConnectionInit => "CONNECTION.INIT",
            ConnectionConnected => "CONNECTION.CONNECTED",
            ConnectionRegistered => "CONNECTION.REGISTERED",
            ConnectionUnregistered => "CONNECTION.UNREGISTERED",
            ConnectionDisconnected => "CONNECTION.DISCONNECTED",
            ConnectionFailed { .. } => "CONNECTION.FAILED",
            ConnectionReset => "CONNECTION.RESET",
            CallConnecting => "CALL.CONNECTING",
            CallRinging => "CALL.RINGING",
            CallAccepted => "CALL.ACCEPTED",
            CallConfirmed => "CALL.CONFIRMED",
            CallEnded => "CALL.ENDED",
            CallFailed { .. } => "CALL.FAILED",
            CallReset => "CALL.RESET",
            IncomingRinging { .. } => "INCOMING.RINGING",
            IncomingConsumed => "INCOMING.CONSUMED",
            IncomingDeclined { .. } => "INCOMING.DECLINED",
            IncomingTerminated { .. } => "INCOMING.TERMINATED",
            IncomingFailed { .. } => "INCOMING.FAILED",
            IncomingClear => "INCOMING.CLEAR",
            ScreenStarting => "SCREEN.STARTING",
            ScreenStarted => "SCREEN.STARTED",
            ScreenEnding => "SCREEN.ENDING",
            ScreenEnded => "SCREEN.ENDED",
            ScreenFailed { .. } => "SCREEN.FAILED",
            ScreenReset => "SCREEN.RESET",
        }
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of offering an event to a transition function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<S> {
    /// Transition taken; the new state may equal the old one
    Next(S),
    /// Own-domain event with no transition from the current state
    Invalid,
    /// Event belongs to another domain and does not concern this machine
    Unhandled,
}

/// Diagnostic for an event rejected by a machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub machine: &'static str,
    pub state: &'static str,
    pub event: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} machine has no transition for {} in state {}",
            self.machine, self.event, self.state
        )
    }
}

/// Static description of one domain machine
pub trait MachineDefinition {
    type State: Clone + PartialEq + fmt::Debug + Send + 'static;

    const NAME: &'static str;

    fn initial() -> Self::State;

    fn step(state: &Self::State, event: &SessionEvent) -> Step<Self::State>;

    /// Short status name used in diagnostics
    fn status_name(state: &Self::State) -> &'static str;
}

/// Apply one event to a state
///
/// Never fails: a rejected event yields the input state unchanged together
/// with a diagnostic.
pub fn apply<D: MachineDefinition>(
    state: &D::State,
    event: &SessionEvent,
) -> (D::State, Option<InvalidTransition>) {
    match D::step(state, event) {
        Step::Next(next) => (next, None),
        Step::Unhandled => (state.clone(), None),
        Step::Invalid => (
            state.clone(),
            Some(InvalidTransition {
                machine: D::NAME,
                state: D::status_name(state),
                event: event.name(),
            }),
        ),
    }
}

/// Running instance of a domain machine
#[derive(Debug)]
pub struct StateMachine<D: MachineDefinition> {
    state: D::State,
    stopped: bool,
}

impl<D: MachineDefinition> Default for StateMachine<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: MachineDefinition> StateMachine<D> {
    pub fn new() -> Self {
        Self {
            state: D::initial(),
            stopped: false,
        }
    }

    pub fn state(&self) -> &D::State {
        &self.state
    }

    /// Offer an event; returns whether the state changed
    pub fn send(&mut self, event: &SessionEvent) -> bool {
        if self.stopped {
            return false;
        }

        let (next, invalid) = apply::<D>(&self.state, event);
        if let Some(invalid) = invalid {
            warn!(
                machine = invalid.machine,
                state = invalid.state,
                event = invalid.event,
                "Ignoring event with no transition"
            );
            return false;
        }

        if next == self.state {
            return false;
        }

        debug!(
            machine = D::NAME,
            from = D::status_name(&self.state),
            to = D::status_name(&next),
            event = event.name(),
            "State transition"
        );
        self.state = next;
        true
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}
