//! Auto-reconnect engine
//!
//! Drives the signaling connection back up after a loss: bounded retries
//! with a fixed delay, then out-of-band telephony checks once attempts are
//! exhausted, then a server ping monitor once connected. Every connect goes
//! through the [`ConnectionQueue`], so a newer intent always supersedes an
//! older one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::attempts::{AttemptsState, ReconnectStatus};
use crate::config::{ConnectParams, LifecycleConfig, ReconnectConfig};
use crate::coordinator::{SessionSnapshot, StateSource};
use crate::deferred::{DeferredCommandRunner, DeferredOutcome};
use crate::error::{FailureKind, LifecycleError};
use crate::monitor::{spawn_detached, ServerPingMonitor, TelephonyCheckMonitor};
use crate::queue::ConnectionQueue;

/// Why the engine gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    /// Attempt limit reached; telephony checks are running
    AttemptsExhausted,
    /// Credentials rejected; nothing is scheduled
    Authentication,
}

/// Payload of [`ReconnectHandler::on_fail`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectFailure {
    pub is_request_timeout_error: bool,
    pub reason: FailReason,
}

/// Callbacks of the reconnect engine
///
/// All methods default to no-ops.
#[cfg_attr(test, mockall::automock)]
pub trait ReconnectHandler: Send + Sync {
    /// Invoked at the start of every connect attempt
    fn on_before_attempt_connect(&self) {}

    fn on_success(&self) {}

    fn on_fail(&self, _failure: ReconnectFailure) {}

    /// The attempt was superseded or its retry delay was cancelled
    fn on_cancel(&self) {}
}

/// Handler that ignores every callback
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReconnectHandler;

impl ReconnectHandler for NoopReconnectHandler {}

enum Next {
    Done,
    Retry,
}

struct EngineInner {
    config: ReconnectConfig,
    queue: Arc<ConnectionQueue>,
    session: Arc<dyn StateSource<SessionSnapshot>>,
    handler: Arc<dyn ReconnectHandler>,
    attempts: Mutex<AttemptsState>,
    params: Mutex<Option<ConnectParams>>,
    delay: Mutex<Option<(u64, CancellationToken)>>,
    next_delay: AtomicU64,
    telephony: TelephonyCheckMonitor,
    ping: ServerPingMonitor,
    after_call: DeferredCommandRunner<SessionSnapshot>,
    /// Bumped by `cancel()`; a loop started before the bump stops scheduling
    epoch: AtomicU64,
    stopped: AtomicBool,
}

/// Reconnects the signaling connection with bounded retries
#[derive(Clone)]
pub struct AutoReconnectEngine {
    inner: Arc<EngineInner>,
}

impl AutoReconnectEngine {
    pub fn new(
        config: &LifecycleConfig,
        queue: Arc<ConnectionQueue>,
        session: Arc<dyn StateSource<SessionSnapshot>>,
        handler: Arc<dyn ReconnectHandler>,
    ) -> Self {
        let reconnect = config.reconnect.clone();
        Self {
            inner: Arc::new(EngineInner {
                attempts: Mutex::new(AttemptsState::new(
                    reconnect.initial_attempt_count,
                    reconnect.attempt_limit,
                )),
                telephony: TelephonyCheckMonitor::new(queue.clone(), reconnect.telephony_check_interval()),
                ping: ServerPingMonitor::new(queue.clone(), session.clone(), &config.ping),
                after_call: DeferredCommandRunner::new("reconnect-after-call", session.clone()),
                config: reconnect,
                queue,
                session,
                handler,
                params: Mutex::new(None),
                delay: Mutex::new(None),
                next_delay: AtomicU64::new(1),
                epoch: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Remember `params` and run the first attempt
    pub async fn start(&self, params: ConnectParams) {
        *self.inner.params.lock() = Some(params);
        self.process_connect().await;
    }

    /// Run the reconnect protocol with the stored parameters
    ///
    /// Resolves once the engine settles: connected, cancelled, failed for
    /// good, handed off to the telephony check loop, or parked until the
    /// active call ends.
    pub fn process_connect(&self) -> BoxFuture<'static, ()> {
        let engine = self.clone();
        async move { engine.connect_loop().await }.boxed()
    }

    async fn connect_loop(&self) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            debug!("Reconnect engine stopped, ignoring connect request");
            return;
        }
        let params = self.inner.params.lock().clone();
        let Some(params) = params else {
            warn!("No connect parameters, call start() first");
            return;
        };
        // A newer request supersedes a loop waiting out its retry delay
        if self.cancel_pending_delay() {
            debug!("Superseding pending reconnect retry");
        }
        let epoch = self.inner.epoch.load(Ordering::SeqCst);

        loop {
            match self.attempt(&params).await {
                Next::Done => return,
                Next::Retry => {
                    if !self.wait_before_retry(epoch).await {
                        self.inner.handler.on_cancel();
                        return;
                    }
                }
            }
        }
    }

    async fn attempt(&self, params: &ConnectParams) -> Next {
        let inner = &self.inner;
        inner.handler.on_before_attempt_connect();
        inner.telephony.stop();
        inner.ping.stop();

        if inner.session.current().is_call_active() {
            self.defer_until_call_ends();
            return Next::Done;
        }

        let reached_limit = inner.attempts.lock().has_reached_limit();
        if reached_limit {
            inner.attempts.lock().start_checking_telephony();
            info!(limit = inner.config.attempt_limit, "Reconnect attempts exhausted, checking telephony");
            inner.handler.on_fail(ReconnectFailure {
                is_request_timeout_error: false,
                reason: FailReason::AttemptsExhausted,
            });
            let engine = self.clone();
            inner.telephony.start(params.telephony_check_params(), move || {
                engine.inner.attempts.lock().reset();
                spawn_detached("reconnect", engine.process_connect());
            });
            return Next::Done;
        }

        let attempt = {
            let mut attempts = inner.attempts.lock();
            attempts.start_connecting();
            attempts.increment();
            attempts.count()
        };
        debug!(attempt, limit = inner.config.attempt_limit, server = %params.server_uri, "Reconnect attempt");

        match inner.queue.reconnect(params).await {
            Ok(()) => {
                info!(attempt, server = %params.server_uri, "Reconnected");
                let engine = self.clone();
                inner.ping.start(move || {
                    spawn_detached("reconnect", engine.process_connect());
                });
                inner.attempts.lock().reset();
                inner.handler.on_success();
                Next::Done
            }
            Err(e) => self.classify_failure(attempt, e).await,
        }
    }

    async fn classify_failure(&self, attempt: u32, error: LifecycleError) -> Next {
        match error.kind() {
            FailureKind::Stale | FailureKind::Cancelled => {
                debug!(attempt, error = %error, "Reconnect attempt superseded");
                self.inner.handler.on_cancel();
                Next::Done
            }
            FailureKind::Authentication => {
                warn!(attempt, error = %error, "Authentication rejected, giving up");
                self.cancel().await;
                self.inner.handler.on_fail(ReconnectFailure {
                    is_request_timeout_error: error.is_request_timeout(),
                    reason: FailReason::Authentication,
                });
                Next::Done
            }
            FailureKind::Timeout | FailureKind::Generic => {
                debug!(attempt, error = %error, "Reconnect attempt failed, retrying");
                Next::Retry
            }
        }
    }

    /// Returns false when the delay was cancelled
    async fn wait_before_retry(&self, epoch: u64) -> bool {
        let token = CancellationToken::new();
        let id = self.inner.next_delay.fetch_add(1, Ordering::SeqCst);
        if let Some((_, previous)) = self.inner.delay.lock().replace((id, token.clone())) {
            previous.cancel();
        }
        // cancel() may have run between the failed attempt and now
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            token.cancel();
        }

        let completed = tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.inner.config.reconnect_delay()) => true,
        };

        let mut slot = self.inner.delay.lock();
        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
            slot.take();
        }
        completed
    }

    fn cancel_pending_delay(&self) -> bool {
        match self.inner.delay.lock().take() {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn defer_until_call_ends(&self) {
        {
            let mut attempts = self.inner.attempts.lock();
            attempts.start_connecting();
            attempts.start_calling();
        }
        debug!("Call in progress, deferring reconnect until it ends");

        // The call may end on a thread outside the runtime
        let runtime = Handle::try_current().ok();
        let engine = self.clone();
        let outcome = self.inner.after_call.set(
            move || {
                engine.inner.attempts.lock().start_connecting();
                match &runtime {
                    Some(runtime) => drop(runtime.spawn(engine.process_connect())),
                    None => drop(spawn_detached("reconnect", engine.process_connect())),
                }
            },
            |snapshot: &SessionSnapshot| !snapshot.is_call_active(),
            |_: &SessionSnapshot| false,
        );
        if outcome == DeferredOutcome::Executed {
            debug!("Call ended before the reconnect was parked");
        }
    }

    /// Cancel whatever the engine is doing
    ///
    /// Cancels the pending retry delay and the parked after-call attempt,
    /// stops both monitors, resets attempts, and issues a best-effort
    /// disconnect.
    pub async fn cancel(&self) {
        let inner = &self.inner;
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_pending_delay();
        inner.after_call.cancel();
        inner.ping.stop();
        inner.telephony.stop();
        inner.attempts.lock().reset();

        if let Err(e) = inner.queue.disconnect().await {
            debug!(error = %e, "Ignoring disconnect failure during cancel");
        }
    }

    /// Cancel, then stop the operation queue; the engine is unusable after
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel().await;
        self.inner.queue.stop();
        debug!("Reconnect engine stopped");
    }

    pub fn status(&self) -> ReconnectStatus {
        self.inner.attempts.lock().status()
    }

    /// Attempts counted since the last reset
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.lock().count()
    }

    pub fn has_pending_retry(&self) -> bool {
        self.inner.delay.lock().is_some()
    }

    pub fn is_waiting_for_call_end(&self) -> bool {
        self.inner.after_call.has_pending()
    }

    pub fn is_checking_telephony(&self) -> bool {
        self.inner.telephony.is_running()
    }

    pub fn is_pinging(&self) -> bool {
        self.inner.ping.is_enabled()
    }

    pub fn queue(&self) -> &Arc<ConnectionQueue> {
        &self.inner.queue
    }
}
