//! Typed publish/subscribe and collaborator event payloads
//!
//! Each collaborator (signaling, call, incoming call) exposes one
//! [`EventEmitter`] carrying its own closed event enum. Listeners are invoked
//! synchronously, in registration order, on the emitting thread. A listener is
//! removed when its [`Subscription`] is dropped or explicitly unsubscribed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::FailureInfo;

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Handle that keeps a listener registered
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// A subscription with nothing to release
    pub fn empty() -> Self {
        Self { unsubscribe: None }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

struct EmitterInner<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener<E>)>>,
}

/// Synchronous, typed event emitter
pub struct EventEmitter<E> {
    inner: Arc<EmitterInner<E>>,
}

impl<E> Clone for EventEmitter<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: 'static> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> EventEmitter<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a listener
    pub fn on<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().push((id, Arc::new(listener)));

        let weak: Weak<EmitterInner<E>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    /// Deliver an event to every current listener
    ///
    /// The listener list is snapshotted first, so listeners may subscribe or
    /// unsubscribe from inside the callback.
    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Drop every listener; outstanding subscriptions become no-ops
    pub fn clear(&self) {
        self.inner.listeners.lock().clear();
    }
}

/// Events raised by the signaling collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingEvent {
    ConnectStarted,
    Connecting,
    Connected,
    Registered,
    Unregistered,
    Disconnected,
    RegistrationFailed { error: FailureInfo },
    ConnectFailed { error: FailureInfo },
}

impl SignalingEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectStarted => "connect-started",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Registered => "registered",
            Self::Unregistered => "unregistered",
            Self::Disconnected => "disconnected",
            Self::RegistrationFailed { .. } => "registrationFailed",
            Self::ConnectFailed { .. } => "connect-failed",
        }
    }
}

/// Events raised by the call collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Connecting,
    Progress,
    Accepted,
    Confirmed,
    Ended,
    Failed { error: FailureInfo },
    PresentationStart,
    PresentationStarted,
    PresentationEnd,
    PresentationEnded,
    PresentationFailed { error: FailureInfo },
}

impl CallEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Progress => "progress",
            Self::Accepted => "accepted",
            Self::Confirmed => "confirmed",
            Self::Ended => "ended",
            Self::Failed { .. } => "failed",
            Self::PresentationStart => "presentation:start",
            Self::PresentationStarted => "presentation:started",
            Self::PresentationEnd => "presentation:end",
            Self::PresentationEnded => "presentation:ended",
            Self::PresentationFailed { .. } => "presentation:failed",
        }
    }
}

/// Who is calling
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerInfo {
    pub incoming_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Host the call originated from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl CallerInfo {
    pub fn new(incoming_number: impl Into<String>) -> Self {
        Self {
            incoming_number: incoming_number.into(),
            display_name: None,
            host: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}

/// Events raised by the incoming-call collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingCallEvent {
    Incoming(CallerInfo),
    Declined(CallerInfo),
    Terminated(CallerInfo),
    Failed(CallerInfo),
}

impl IncomingCallEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Incoming(_) => "incomingCall",
            Self::Declined(_) => "declinedIncomingCall",
            Self::Terminated(_) => "terminatedIncomingCall",
            Self::Failed(_) => "failedIncomingCall",
        }
    }

    pub fn caller(&self) -> &CallerInfo {
        match self {
            Self::Incoming(caller)
            | Self::Declined(caller)
            | Self::Terminated(caller)
            | Self::Failed(caller) => caller,
        }
    }
}
