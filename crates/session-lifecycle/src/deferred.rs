//! Deferred command runner
//!
//! Holds at most one pending command and runs it exactly once when the
//! observed state satisfies a readiness predicate. If a cancellation
//! predicate matches first, or a newer command is set, the pending one is
//! discarded. In every case the state subscription is released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::coordinator::StateSource;
use crate::events::Subscription;

type Command = Box<dyn FnOnce() + Send>;
type Predicate<S> = Box<dyn Fn(&S) -> bool + Send + Sync>;

/// What happened to a command at the time it was evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredOutcome {
    Executed,
    Cancelled,
    /// Waiting for a state change
    Pending,
}

struct Pending<S> {
    id: u64,
    command: Command,
    ready: Predicate<S>,
    cancel: Predicate<S>,
    subscription: Option<Subscription>,
}

struct RunnerInner<S> {
    source: Arc<dyn StateSource<S>>,
    slot: Mutex<Option<Pending<S>>>,
    /// Last command settled by its predicates
    settled: Mutex<Option<(u64, DeferredOutcome)>>,
    next_id: AtomicU64,
    name: &'static str,
}

/// Runs one command once a state predicate holds
pub struct DeferredCommandRunner<S> {
    inner: Arc<RunnerInner<S>>,
}

impl<S> Clone for DeferredCommandRunner<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: 'static> DeferredCommandRunner<S> {
    pub fn new(name: &'static str, source: Arc<dyn StateSource<S>>) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                source,
                slot: Mutex::new(None),
                settled: Mutex::new(None),
                next_id: AtomicU64::new(1),
                name,
            }),
        }
    }

    /// Set the command, superseding any pending one
    ///
    /// The predicates are checked against the current state right away;
    /// cancellation wins when both match. The command is registered before
    /// the state subscription and checked again once it is installed, so a
    /// change landing in between is not missed.
    pub fn set<C, R, X>(&self, command: C, ready: R, cancel: X) -> DeferredOutcome
    where
        C: FnOnce() + Send + 'static,
        R: Fn(&S) -> bool + Send + Sync + 'static,
        X: Fn(&S) -> bool + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self.inner.slot.lock().replace(Pending {
            id,
            command: Box::new(command),
            ready: Box::new(ready),
            cancel: Box::new(cancel),
            subscription: None,
        });
        if let Some(previous) = previous {
            debug!(runner = self.inner.name, id = previous.id, "Deferred command superseded");
        }

        let state = self.inner.source.current();
        if let Some(outcome) = RunnerInner::evaluate(&self.inner, id, &state) {
            return outcome;
        }

        let weak = Arc::downgrade(&self.inner);
        let subscription = self.inner.source.watch(Box::new(move |state: &S| {
            if let Some(inner) = weak.upgrade() {
                RunnerInner::evaluate(&inner, id, state);
            }
        }));
        let unused = {
            let mut slot = self.inner.slot.lock();
            match slot.as_mut() {
                Some(pending) if pending.id == id => {
                    pending.subscription = Some(subscription);
                    None
                }
                _ => Some(subscription),
            }
        };
        // Settled or superseded while subscribing
        if let Some(subscription) = unused {
            drop(subscription);
            return self.inner.outcome_of(id);
        }

        let state = self.inner.source.current();
        if let Some(outcome) = RunnerInner::evaluate(&self.inner, id, &state) {
            return outcome;
        }
        debug!(runner = self.inner.name, id, "Deferred command waiting");
        DeferredOutcome::Pending
    }

    /// Discard the pending command; returns whether there was one
    pub fn cancel(&self) -> bool {
        let pending = self.inner.slot.lock().take();
        match pending {
            Some(pending) => {
                debug!(runner = self.inner.name, id = pending.id, "Deferred command cancelled");
                true
            }
            None => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.inner.slot.lock().is_some()
    }
}

impl<S> RunnerInner<S> {
    /// Settle command `id` against `state` if it is still pending
    fn evaluate(inner: &Arc<Self>, id: u64, state: &S) -> Option<DeferredOutcome> {
        let resolved = {
            let mut slot = inner.slot.lock();
            let decision = match slot.as_ref() {
                Some(pending) if pending.id == id => {
                    if (pending.cancel)(state) {
                        Some(DeferredOutcome::Cancelled)
                    } else if (pending.ready)(state) {
                        Some(DeferredOutcome::Executed)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            let resolved = decision.and_then(|outcome| slot.take().map(|pending| (outcome, pending)));
            if let Some((outcome, _)) = &resolved {
                *inner.settled.lock() = Some((id, *outcome));
            }
            resolved
        };

        // The slot lock is released before the command runs or the
        // subscription is dropped.
        let (outcome, mut pending) = resolved?;
        drop(pending.subscription.take());
        match outcome {
            DeferredOutcome::Executed => {
                debug!(runner = inner.name, id, "Deferred command executing");
                (pending.command)();
            }
            _ => debug!(runner = inner.name, id, "Deferred command cancelled by state"),
        }
        Some(outcome)
    }

    /// How command `id` ended; a superseded command counts as cancelled
    fn outcome_of(&self, id: u64) -> DeferredOutcome {
        match *self.settled.lock() {
            Some((settled, outcome)) if settled == id => outcome,
            _ => DeferredOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{SessionCoordinator, SessionSnapshot};
    use crate::machines::{CallStatus, ConnectionStatus, SessionEvent};
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn runner(coordinator: &SessionCoordinator) -> DeferredCommandRunner<SessionSnapshot> {
        DeferredCommandRunner::new("test", Arc::new(coordinator.clone()))
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn connected(s: &SessionSnapshot) -> bool {
        s.connection.status.is_connected()
    }

    fn failed(s: &SessionSnapshot) -> bool {
        s.connection.status == ConnectionStatus::Failed
    }

    #[test]
    fn test_runs_immediately_when_ready() {
        let coordinator = SessionCoordinator::new();
        let (count, command) = counter();
        let outcome = runner(&coordinator).set(command, |s| s.call.status == CallStatus::Idle, |_| false);
        assert_eq!(outcome, DeferredOutcome::Executed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_runs_once_when_state_becomes_ready() {
        let coordinator = SessionCoordinator::new();
        let runner = runner(&coordinator);
        let (count, command) = counter();

        assert_eq!(runner.set(command, connected, failed), DeferredOutcome::Pending);
        coordinator.send(SessionEvent::ConnectionStart);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        coordinator.send(SessionEvent::ConnectionConnected);
        coordinator.send(SessionEvent::ConnectionRegistered);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!runner.has_pending());
    }

    #[test]
    fn test_cancel_predicate_discards_command() {
        let coordinator = SessionCoordinator::new();
        let runner = runner(&coordinator);
        let (count, command) = counter();

        runner.set(command, connected, failed);
        coordinator.send(SessionEvent::ConnectionStart);
        coordinator.send(SessionEvent::ConnectionFailed {
            error: crate::error::FailureInfo::new("503"),
        });
        assert!(!runner.has_pending());

        coordinator.send(SessionEvent::ConnectionStart);
        coordinator.send(SessionEvent::ConnectionConnected);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_newer_command_supersedes_pending_one() {
        let coordinator = SessionCoordinator::new();
        let runner = runner(&coordinator);
        let (first, first_command) = counter();
        let (second, second_command) = counter();

        runner.set(first_command, connected, failed);
        runner.set(second_command, connected, failed);
        coordinator.send(SessionEvent::ConnectionStart);
        coordinator.send(SessionEvent::ConnectionConnected);

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_explicit_cancel() {
        let coordinator = SessionCoordinator::new();
        let runner = runner(&coordinator);
        let (count, command) = counter();

        runner.set(command, connected, failed);
        assert!(runner.cancel());
        assert!(!runner.cancel());

        coordinator.send(SessionEvent::ConnectionStart);
        coordinator.send(SessionEvent::ConnectionConnected);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancelled_immediately() {
        let coordinator = SessionCoordinator::new();
        let (count, command) = counter();
        let outcome = runner(&coordinator).set(command, |_| true, |_| true);
        assert_eq!(outcome, DeferredOutcome::Cancelled);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    /// Source whose state flips to ready while the subscription is being
    /// installed, without notifying the new listener
    struct FlipsOnWatch {
        ready: AtomicBool,
    }

    impl StateSource<bool> for FlipsOnWatch {
        fn current(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn watch(&self, _listener: Box<dyn Fn(&bool) + Send + Sync>) -> Subscription {
            self.ready.store(true, Ordering::SeqCst);
            Subscription::empty()
        }
    }

    #[test]
    fn test_change_during_subscribe_is_not_lost() {
        let source = Arc::new(FlipsOnWatch {
            ready: AtomicBool::new(false),
        });
        let runner: DeferredCommandRunner<bool> = DeferredCommandRunner::new("flip", source);
        let (count, command) = counter();

        let outcome = runner.set(command, |ready| *ready, |_| false);
        assert_eq!(outcome, DeferredOutcome::Executed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!runner.has_pending());
    }
}
