//! Session coordinator
//!
//! Runs the four domain machines as one parallel composition. Every event is
//! broadcast to all machines inside a single processing step, the resulting
//! snapshots are aggregated into one [`SessionSnapshot`], and listeners are
//! notified only when that aggregate actually changed.
//!
//! ```rust
//! use rvoip_session_lifecycle::coordinator::SessionCoordinator;
//! use rvoip_session_lifecycle::events::CallerInfo;
//! use rvoip_session_lifecycle::machines::{CallStatus, IncomingStatus, SessionEvent};
//!
//! let coordinator = SessionCoordinator::new();
//! coordinator.send(SessionEvent::IncomingRinging { caller: CallerInfo::new("101") });
//! coordinator.send(SessionEvent::CallAccepted);
//!
//! let snapshot = coordinator.snapshot();
//! assert_eq!(snapshot.incoming.status, IncomingStatus::Consumed);
//! assert_eq!(snapshot.call.status, CallStatus::Accepted);
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, trace};

use crate::events::{EventEmitter, Subscription};
use crate::machines::{
    CallMachine, CallSnapshot, ConnectionMachine, ConnectionSnapshot, IncomingMachine,
    IncomingSnapshot, PresentationMachine, PresentationSnapshot, SessionEvent, StateMachine,
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Identifier of one coordinator instance, used in logs
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", uuid::Uuid::new_v4()))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consistent read of all four machines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub connection: ConnectionSnapshot,
    pub call: CallSnapshot,
    pub incoming: IncomingSnapshot,
    pub presentation: PresentationSnapshot,
}

impl SessionSnapshot {
    pub fn is_registered(&self) -> bool {
        self.connection.status == crate::machines::ConnectionStatus::Registered
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status.is_connected()
    }

    pub fn is_call_active(&self) -> bool {
        self.call.status.is_active()
    }
}

/// Notification carrying the snapshots around one accepted event
#[derive(Debug, Clone)]
pub struct SnapshotChanged {
    pub previous: SessionSnapshot,
    pub current: SessionSnapshot,
    /// Name of the event that caused the change
    pub event: &'static str,
    pub at: DateTime<Utc>,
}

/// Stream of snapshot changes
pub type SnapshotStream = BroadcastStream<SnapshotChanged>;

/// Something that exposes a state and notifies on change
///
/// Implemented by [`SessionCoordinator`]; consumed by the deferred command
/// runner and the reconnect engine so they depend on a narrow interface.
pub trait StateSource<S>: Send + Sync + 'static {
    fn current(&self) -> S;

    fn watch(&self, listener: Box<dyn Fn(&S) + Send + Sync>) -> Subscription;
}

#[derive(Default)]
struct Machines {
    connection: StateMachine<ConnectionMachine>,
    call: StateMachine<CallMachine>,
    incoming: StateMachine<IncomingMachine>,
    presentation: StateMachine<PresentationMachine>,
}

impl Machines {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection.state().clone(),
            call: self.call.state().clone(),
            incoming: self.incoming.state().clone(),
            presentation: self.presentation.state().clone(),
        }
    }

    /// Offer the event to every machine; non-short-circuiting
    fn send(&mut self, event: &SessionEvent) -> bool {
        let connection = self.connection.send(event);
        let call = self.call.send(event);
        let incoming = self.incoming.send(event);
        let presentation = self.presentation.send(event);
        connection | call | incoming | presentation
    }

    fn stop(&mut self) {
        self.connection.stop();
        self.call.stop();
        self.incoming.stop();
        self.presentation.stop();
    }
}

/// Per-dispatch bookkeeping, only touched by the thread holding `dispatch`
#[derive(Default)]
struct DispatchState {
    active: bool,
    /// Events sent by listeners during the current notification round
    pending: VecDeque<SessionEvent>,
}

/// Clears the dispatch state even if a listener panics
struct ActiveDispatch<'a>(&'a RefCell<DispatchState>);

impl Drop for ActiveDispatch<'_> {
    fn drop(&mut self) {
        let mut state = self.0.borrow_mut();
        state.active = false;
        state.pending.clear();
    }
}

struct CoordinatorInner {
    id: SessionId,
    machines: Mutex<Machines>,
    /// Serializes event processing; re-entered when a listener sends
    dispatch: ReentrantMutex<RefCell<DispatchState>>,
    listeners: EventEmitter<SnapshotChanged>,
    changes_tx: broadcast::Sender<SnapshotChanged>,
    stopped: AtomicBool,
}

/// Parallel composition of the connection, call, incoming and presentation
/// machines
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCoordinator {
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(CoordinatorInner {
                id: SessionId::new(),
                machines: Mutex::new(Machines::default()),
                dispatch: ReentrantMutex::new(RefCell::new(DispatchState::default())),
                listeners: EventEmitter::new(),
                changes_tx,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Broadcast an event to every machine
    ///
    /// Returns whether the aggregated snapshot changed. Listeners run after
    /// all four machines have processed the event.
    ///
    /// An event sent from inside a listener is queued and processed once the
    /// current notification round is over, so every listener and the change
    /// stream observe changes in processing order. In that case this returns
    /// `false`; the outcome is visible through the usual notifications.
    pub fn send(&self, event: SessionEvent) -> bool {
        if self.is_stopped() {
            debug!(session = %self.inner.id, event = event.name(), "Coordinator stopped, dropping event");
            return false;
        }

        let dispatch = self.inner.dispatch.lock();
        {
            let mut state = dispatch.borrow_mut();
            if state.active {
                trace!(session = %self.inner.id, event = event.name(), "Queueing event sent during notification");
                state.pending.push_back(event);
                return false;
            }
            state.active = true;
        }
        let _active = ActiveDispatch(&*dispatch);

        let changed = self.process(&event);
        loop {
            let next = dispatch.borrow_mut().pending.pop_front();
            match next {
                Some(queued) => {
                    self.process(&queued);
                }
                None => break,
            }
        }
        changed
    }

    /// Apply one event and notify; the caller holds the dispatch lock
    fn process(&self, event: &SessionEvent) -> bool {
        if self.is_stopped() {
            return false;
        }
        let (previous, current) = {
            let mut machines = self.inner.machines.lock();
            let previous = machines.snapshot();
            if !machines.send(event) {
                trace!(session = %self.inner.id, event = event.name(), "Event left snapshot unchanged");
                return false;
            }
            (previous, machines.snapshot())
        };

        let change = SnapshotChanged {
            previous,
            current,
            event: event.name(),
            at: Utc::now(),
        };
        self.inner.listeners.emit(&change);
        // No receivers is fine
        let _ = self.inner.changes_tx.send(change);
        true
    }

    /// Current aggregated snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.machines.lock().snapshot()
    }

    /// Full-snapshot subscription
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        self.inner.listeners.on(move |change| listener(&change.current))
    }

    /// Subscribe to the raw change notifications including the previous snapshot
    pub fn on_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SnapshotChanged) + Send + Sync + 'static,
    {
        self.inner.listeners.on(listener)
    }

    /// Selector subscription using `PartialEq` to detect changes
    pub fn subscribe_selected<T, S, F>(&self, selector: S, listener: F) -> Subscription
    where
        T: PartialEq + 'static,
        S: Fn(&SessionSnapshot) -> T + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribe_selected_with(selector, |a: &T, b: &T| a == b, listener)
    }

    /// Selector subscription with a custom equality
    ///
    /// `listener` runs only when `equals(previous, next)` is false for the
    /// selected slice.
    pub fn subscribe_selected_with<T, S, E, F>(&self, selector: S, equals: E, listener: F) -> Subscription
    where
        T: 'static,
        S: Fn(&SessionSnapshot) -> T + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.listeners.on(move |change| {
            let previous = selector(&change.previous);
            let next = selector(&change.current);
            if !equals(&previous, &next) {
                listener(&next);
            }
        })
    }

    /// Stream of `snapshot-changed` notifications
    pub fn changes(&self) -> SnapshotStream {
        BroadcastStream::new(self.inner.changes_tx.subscribe())
    }

    pub fn changes_receiver(&self) -> broadcast::Receiver<SnapshotChanged> {
        self.inner.changes_tx.subscribe()
    }

    /// Stop every machine and drop all listeners; idempotent
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _dispatch = self.inner.dispatch.lock();
        self.inner.machines.lock().stop();
        self.inner.listeners.clear();
        debug!(session = %self.inner.id, "Session coordinator stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }
}

impl StateSource<SessionSnapshot> for SessionCoordinator {
    fn current(&self) -> SessionSnapshot {
        self.snapshot()
    }

    fn watch(&self, listener: Box<dyn Fn(&SessionSnapshot) + Send + Sync>) -> Subscription {
        self.subscribe(move |snapshot| listener(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureInfo;
    use crate::events::CallerInfo;
    use crate::machines::{CallStatus, ConnectionStatus, IncomingStatus, PresentationStatus};
    use std::sync::atomic::AtomicUsize;
    use tokio_stream::StreamExt;

    #[test]
    fn test_initial_snapshot_is_idle() {
        let coordinator = SessionCoordinator::new();
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.connection.status, ConnectionStatus::Idle);
        assert_eq!(snapshot.call.status, CallStatus::Idle);
        assert_eq!(snapshot.incoming.status, IncomingStatus::Idle);
        assert_eq!(snapshot.presentation.status, PresentationStatus::Idle);
        assert!(coordinator.id().0.starts_with("session-"));
    }

    #[test]
    fn test_snapshot_is_stable_between_events() {
        let coordinator = SessionCoordinator::new();
        coordinator.send(SessionEvent::ConnectionStart);
        assert_eq!(coordinator.snapshot(), coordinator.snapshot());
    }

    #[test]
    fn test_listener_called_only_on_change() {
        let coordinator = SessionCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let calls = calls.clone();
            coordinator.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        assert!(coordinator.send(SessionEvent::ConnectionStart));
        assert!(!coordinator.send(SessionEvent::ConnectionRegistered));
        assert!(!coordinator.send(SessionEvent::ScreenStarted));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_selector_ignores_unrelated_slices() {
        let coordinator = SessionCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let calls = calls.clone();
            coordinator.subscribe_selected(
                |snapshot| snapshot.presentation.status,
                move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                },
            )
        };

        coordinator.send(SessionEvent::ConnectionStart);
        coordinator.send(SessionEvent::ConnectionConnected);
        coordinator.send(SessionEvent::CallConnecting);
        coordinator.send(SessionEvent::IncomingRinging {
            caller: CallerInfo::new("200"),
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        coordinator.send(SessionEvent::ScreenStarting);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_selector_with_custom_equality() {
        let coordinator = SessionCoordinator::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            coordinator.subscribe_selected_with(
                |snapshot| snapshot.connection.status,
                |a, b| a.is_connected() == b.is_connected(),
                move |status| seen.lock().push(*status),
            )
        };

        coordinator.send(SessionEvent::ConnectionStart);
        coordinator.send(SessionEvent::ConnectionInit);
        coordinator.send(SessionEvent::ConnectionConnected);
        coordinator.send(SessionEvent::ConnectionRegistered);
        coordinator.send(SessionEvent::ConnectionDisconnected);
        assert_eq!(
            *seen.lock(),
            vec![ConnectionStatus::Connected, ConnectionStatus::Disconnected]
        );
    }

    #[test]
    fn test_listener_may_send_events() {
        let coordinator = SessionCoordinator::new();
        let _sub = {
            let inner = coordinator.clone();
            coordinator.subscribe_selected(
                |snapshot| snapshot.call.status,
                move |status| {
                    if *status == CallStatus::Ended {
                        inner.send(SessionEvent::CallReset);
                    }
                },
            )
        };

        coordinator.send(SessionEvent::CallConnecting);
        coordinator.send(SessionEvent::CallEnded);
        assert_eq!(coordinator.snapshot().call.status, CallStatus::Idle);
    }

    #[test]
    fn test_events_sent_by_listeners_keep_processing_order() {
        let coordinator = SessionCoordinator::new();
        let mut changes = coordinator.changes_receiver();
        let _resetter = {
            let inner = coordinator.clone();
            coordinator.subscribe_selected(
                |snapshot| snapshot.call.status,
                move |status| {
                    if *status == CallStatus::Ended {
                        inner.send(SessionEvent::CallReset);
                    }
                },
            )
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _recorder = {
            let seen = seen.clone();
            coordinator.subscribe_selected(
                |snapshot| snapshot.call.status,
                move |status| seen.lock().push(*status),
            )
        };

        coordinator.send(SessionEvent::CallConnecting);
        assert!(coordinator.send(SessionEvent::CallEnded));

        assert_eq!(
            *seen.lock(),
            vec![CallStatus::Connecting, CallStatus::Ended, CallStatus::Idle]
        );
        assert_eq!(coordinator.snapshot().call.status, CallStatus::Idle);

        let mut order = Vec::new();
        while let Ok(change) = changes.try_recv() {
            order.push(change.event);
        }
        assert_eq!(order, vec!["CALL.CONNECTING", "CALL.ENDED", "CALL.RESET"]);
    }

    #[test]
    fn test_stop_is_idempotent_and_silences_everything() {
        let coordinator = SessionCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let sub = {
            let calls = calls.clone();
            coordinator.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };

        coordinator.stop();
        coordinator.stop();
        assert!(coordinator.is_stopped());
        assert!(!coordinator.send(SessionEvent::ConnectionStart));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.snapshot().connection.status, ConnectionStatus::Idle);
        drop(sub);
    }

    #[tokio::test]
    async fn test_change_stream_carries_previous_and_current() {
        let coordinator = SessionCoordinator::new();
        let mut changes = coordinator.changes();

        coordinator.send(SessionEvent::CallConnecting);
        coordinator.send(SessionEvent::CallFailed {
            error: FailureInfo::new("Not Found").with_status(404),
        });

        let first = changes.next().await.unwrap().unwrap();
        assert_eq!(first.event, "CALL.CONNECTING");
        assert_eq!(first.previous.call.status, CallStatus::Idle);
        assert_eq!(first.current.call.status, CallStatus::Connecting);

        let second = changes.next().await.unwrap().unwrap();
        assert_eq!(second.previous, first.current);
        assert_eq!(second.current.call.error.as_ref().unwrap().status_code, Some(404));
    }

    #[test]
    fn test_snapshot_serializes() {
        let coordinator = SessionCoordinator::new();
        coordinator.send(SessionEvent::IncomingRinging {
            caller: CallerInfo::new("101").with_host("pbx.example.com"),
        });
        let json = serde_json::to_value(coordinator.snapshot()).unwrap();
        assert_eq!(json["incoming"]["status"], "ringing");
        assert_eq!(json["incoming"]["caller"]["incoming_number"], "101");
        assert_eq!(json["call"]["status"], "idle");
    }
}
