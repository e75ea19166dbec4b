//! Event adapter
//!
//! Translates the events raised by the signaling, call and incoming-call
//! collaborators into [`SessionEvent`]s for the [`SessionCoordinator`].
//!
//! Beyond the one-to-one mapping:
//!
//! * `disconnected` and `registrationFailed` end any presentation and call
//!   and clear the incoming-call state; there is no session without a
//!   connection.
//! * call `accepted`/`confirmed` consumes a ringing incoming call.
//! * call `ended`/`failed` clears the incoming-call state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::coordinator::SessionCoordinator;
use crate::events::{CallEvent, EventEmitter, IncomingCallEvent, SignalingEvent, Subscription};
use crate::machines::{PresentationStatus, SessionEvent};

struct Translator {
    coordinator: SessionCoordinator,
    /// Whether an incoming call is ringing and not yet consumed
    incoming_pending: AtomicBool,
}

impl Translator {
    fn send(&self, event: SessionEvent) {
        trace!(event = event.name(), "Forwarding event to coordinator");
        self.coordinator.send(event);
    }

    fn on_signaling(&self, event: &SignalingEvent) {
        debug!(event = event.name(), "Signaling event");
        match event {
            SignalingEvent::ConnectStarted => self.send(SessionEvent::ConnectionStart),
            SignalingEvent::Connecting => self.send(SessionEvent::ConnectionInit),
            SignalingEvent::Connected => self.send(SessionEvent::ConnectionConnected),
            SignalingEvent::Registered => self.send(SessionEvent::ConnectionRegistered),
            SignalingEvent::Unregistered => self.send(SessionEvent::ConnectionUnregistered),
            SignalingEvent::Disconnected => {
                self.send(SessionEvent::ConnectionDisconnected);
                self.end_session();
            }
            SignalingEvent::RegistrationFailed { error } => {
                self.send(SessionEvent::ConnectionFailed { error: error.clone() });
                self.end_session();
            }
            SignalingEvent::ConnectFailed { error } => {
                self.send(SessionEvent::ConnectionFailed { error: error.clone() });
            }
        }
    }

    /// Force presentation and call to end and clear the incoming call
    fn end_session(&self) {
        let snapshot = self.coordinator.snapshot();
        if snapshot.presentation.status != PresentationStatus::Idle {
            self.send(SessionEvent::ScreenEnded);
        }
        if snapshot.call.status.is_active() {
            self.send(SessionEvent::CallEnded);
        }
        self.clear_incoming();
    }

    fn clear_incoming(&self) {
        self.incoming_pending.store(false, Ordering::SeqCst);
        self.send(SessionEvent::IncomingClear);
    }

    fn consume_incoming(&self) {
        if self.incoming_pending.swap(false, Ordering::SeqCst) {
            self.send(SessionEvent::IncomingConsumed);
        }
    }

    fn on_call(&self, event: &CallEvent) {
        debug!(event = event.name(), "Call event");
        match event {
            CallEvent::Connecting => self.send(SessionEvent::CallConnecting),
            CallEvent::Progress => self.send(SessionEvent::CallRinging),
            CallEvent::Accepted => {
                self.consume_incoming();
                self.send(SessionEvent::CallAccepted);
            }
            CallEvent::Confirmed => {
                self.consume_incoming();
                self.send(SessionEvent::CallConfirmed);
            }
            CallEvent::Ended => {
                self.send(SessionEvent::CallEnded);
                self.clear_incoming();
            }
            CallEvent::Failed { error } => {
                self.send(SessionEvent::CallFailed { error: error.clone() });
                self.clear_incoming();
            }
            CallEvent::PresentationStart => self.send(SessionEvent::ScreenStarting),
            CallEvent::PresentationStarted => self.send(SessionEvent::ScreenStarted),
            CallEvent::PresentationEnd => self.send(SessionEvent::ScreenEnding),
            CallEvent::PresentationEnded => self.send(SessionEvent::ScreenEnded),
            CallEvent::PresentationFailed { error } => {
                self.send(SessionEvent::ScreenFailed { error: error.clone() })
            }
        }
    }

    fn on_incoming(&self, event: &IncomingCallEvent) {
        debug!(event = event.name(), number = %event.caller().incoming_number, "Incoming call event");
        if let IncomingCallEvent::Incoming(caller) = event {
            self.incoming_pending.store(true, Ordering::SeqCst);
            self.send(SessionEvent::IncomingRinging { caller: caller.clone() });
            return;
        }

        if !self.incoming_pending.swap(false, Ordering::SeqCst) {
            debug!(event = event.name(), "No ringing incoming call, ignoring");
            return;
        }
        let caller = event.caller().clone();
        match event {
            IncomingCallEvent::Declined(_) => self.send(SessionEvent::IncomingDeclined { caller }),
            IncomingCallEvent::Terminated(_) => self.send(SessionEvent::IncomingTerminated { caller }),
            IncomingCallEvent::Failed(_) => self.send(SessionEvent::IncomingFailed { caller }),
            IncomingCallEvent::Incoming(_) => {}
        }
    }
}

/// Bridges collaborator emitters to a [`SessionCoordinator`]
pub struct EventAdapter {
    translator: Arc<Translator>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl EventAdapter {
    /// Subscribe to all three emitters
    pub fn attach(
        coordinator: &SessionCoordinator,
        signaling: &EventEmitter<SignalingEvent>,
        calls: &EventEmitter<CallEvent>,
        incoming: &EventEmitter<IncomingCallEvent>,
    ) -> Self {
        let translator = Arc::new(Translator {
            coordinator: coordinator.clone(),
            incoming_pending: AtomicBool::new(false),
        });

        let subscriptions = vec![
            {
                let t = translator.clone();
                signaling.on(move |event| t.on_signaling(event))
            },
            {
                let t = translator.clone();
                calls.on(move |event| t.on_call(event))
            },
            {
                let t = translator.clone();
                incoming.on(move |event| t.on_incoming(event))
            },
        ];
        debug!(session = %coordinator.id(), "Event adapter attached");

        Self {
            translator,
            subscriptions: Mutex::new(subscriptions),
        }
    }

    /// Unsubscribe from every emitter; idempotent
    pub fn detach(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        if !subscriptions.is_empty() {
            debug!(session = %self.translator.coordinator.id(), "Event adapter detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }

    /// Whether an incoming call is ringing and not yet answered
    pub fn has_pending_incoming(&self) -> bool {
        self.translator.incoming_pending.load(Ordering::SeqCst)
    }
}
