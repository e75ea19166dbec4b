//! Health monitors
//!
//! [`RepeatingTask`] is a small scheduler wrapper: one timer, re-armed after
//! each completed attempt, with `start`/`stop` safe to call redundantly.
//! [`TelephonyCheckMonitor`] polls reachability once reconnect attempts are
//! exhausted; [`ServerPingMonitor`] pings the server while connected and no
//! call is active.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{PingConfig, TelephonyCheckParams};
use crate::coordinator::{SessionSnapshot, StateSource};
use crate::error::Result;
use crate::events::Subscription;
use crate::queue::ConnectionQueue;

/// Whether a repeating task should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// Spawn on the current runtime, if there is one
pub(crate) fn spawn_detached<F>(name: &'static str, future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => {
            warn!(task = name, "No tokio runtime available, task not started");
            None
        }
    }
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs an attempt every `interval` until stopped
pub struct RepeatingTask {
    name: &'static str,
    interval: Duration,
    continue_on_failure: bool,
    running: Mutex<Option<Running>>,
}

impl RepeatingTask {
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            continue_on_failure: true,
            running: Mutex::new(None),
        }
    }

    pub fn with_continue_on_failure(mut self, continue_on_failure: bool) -> Self {
        self.continue_on_failure = continue_on_failure;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the loop on the current runtime; a no-op if it is already running
    ///
    /// The first attempt happens one interval after start. A failed attempt
    /// stops the loop unless `continue_on_failure` is set. Returns false when
    /// called outside a runtime.
    pub fn start<F, Fut>(&self, attempt: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Control>> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(runtime) => self.start_on(&runtime, attempt),
            Err(_) => {
                warn!(task = self.name, "No tokio runtime available, task not started");
                false
            }
        }
    }

    /// Like [`start`](Self::start), spawning on `runtime` from any thread
    pub fn start_on<F, Fut>(&self, runtime: &Handle, mut attempt: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Control>> + Send + 'static,
    {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished() && !r.token.is_cancelled()) {
            return false;
        }

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let (name, interval, continue_on_failure) = (self.name, self.interval, self.continue_on_failure);

        let handle = runtime.spawn(async move {
            debug!(task = name, interval_ms = interval.as_millis() as u64, "Repeating task started");
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                let outcome = attempt().await;
                // Results that arrive after stop() are ignored
                if loop_token.is_cancelled() {
                    break;
                }
                match outcome {
                    Ok(Control::Continue) => {}
                    Ok(Control::Stop) => break,
                    Err(e) if continue_on_failure => {
                        debug!(task = name, error = %e, "Attempt failed, re-arming");
                    }
                    Err(e) => {
                        debug!(task = name, error = %e, "Attempt failed, stopping");
                        break;
                    }
                }
            }
            debug!(task = name, "Repeating task finished");
        });

        *running = Some(Running { token, handle });
        true
    }

    /// Stop the loop; a no-op if it is not running
    pub fn stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished() && !r.token.is_cancelled())
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Polls telephony reachability until the server can take a connection
pub struct TelephonyCheckMonitor {
    task: RepeatingTask,
    queue: Arc<ConnectionQueue>,
}

impl TelephonyCheckMonitor {
    pub fn new(queue: Arc<ConnectionQueue>, interval: Duration) -> Self {
        Self {
            task: RepeatingTask::new("telephony-check", interval).with_continue_on_failure(true),
            queue,
        }
    }

    /// Start polling; `on_ready` runs once, after the first successful probe
    pub fn start<R>(&self, params: TelephonyCheckParams, on_ready: R) -> bool
    where
        R: Fn() + Send + Sync + 'static,
    {
        let queue = self.queue.clone();
        let on_ready = Arc::new(on_ready);
        self.task.start(move || {
            let queue = queue.clone();
            let params = params.clone();
            let on_ready = on_ready.clone();
            async move {
                queue.check_telephony(&params).await?;
                info!(server = %params.server_uri, "Telephony check succeeded");
                on_ready();
                Ok(Control::Stop)
            }
        })
    }

    pub fn stop(&self) {
        self.task.stop();
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

struct PingState {
    enabled: AtomicBool,
    call_active: AtomicBool,
    failures: Arc<AtomicU32>,
    on_unhealthy: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

/// Periodic server ping that pauses while a call is active
pub struct ServerPingMonitor {
    task: Arc<RepeatingTask>,
    queue: Arc<ConnectionQueue>,
    session: Arc<dyn StateSource<SessionSnapshot>>,
    max_failures: u32,
    state: Arc<PingState>,
    call_watch: Mutex<Option<Subscription>>,
}

impl ServerPingMonitor {
    pub fn new(
        queue: Arc<ConnectionQueue>,
        session: Arc<dyn StateSource<SessionSnapshot>>,
        config: &PingConfig,
    ) -> Self {
        Self {
            task: Arc::new(RepeatingTask::new("server-ping", config.interval())),
            queue,
            session,
            max_failures: config.max_failures,
            state: Arc::new(PingState {
                enabled: AtomicBool::new(false),
                call_active: AtomicBool::new(false),
                failures: Arc::new(AtomicU32::new(0)),
                on_unhealthy: Mutex::new(None),
            }),
            call_watch: Mutex::new(None),
        }
    }

    /// Start pinging
    ///
    /// `on_unhealthy` runs when more than `max_failures` consecutive pings
    /// failed; the monitor stops itself at that point. Must be called from
    /// within a runtime; pings resumed after a call run on that runtime even
    /// when the call ends on another thread.
    pub fn start<U>(&self, on_unhealthy: U)
    where
        U: Fn() + Send + Sync + 'static,
    {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No tokio runtime available, server ping not started");
                return;
            }
        };
        *self.state.on_unhealthy.lock() = Some(Arc::new(on_unhealthy));
        self.state.failures.store(0, Ordering::SeqCst);
        if self.state.enabled.swap(true, Ordering::SeqCst) {
            return;
        }

        let call_active = self.session.current().is_call_active();
        self.state.call_active.store(call_active, Ordering::SeqCst);

        let task = self.task.clone();
        let queue = self.queue.clone();
        let state = self.state.clone();
        let max_failures = self.max_failures;
        let watch_runtime = runtime.clone();
        let subscription = self.session.watch(Box::new(move |snapshot: &SessionSnapshot| {
            let active = snapshot.is_call_active();
            if state.call_active.swap(active, Ordering::SeqCst) == active {
                return;
            }
            if active {
                debug!("Call active, pausing server ping");
                task.stop();
            } else if state.enabled.load(Ordering::SeqCst) {
                debug!("Call over, resuming server ping");
                Self::run_loop(&watch_runtime, &task, &queue, &state, max_failures);
            }
        }));
        *self.call_watch.lock() = Some(subscription);

        if !call_active {
            Self::run_loop(&runtime, &self.task, &self.queue, &self.state, self.max_failures);
        }
    }

    fn run_loop(
        runtime: &Handle,
        task: &RepeatingTask,
        queue: &Arc<ConnectionQueue>,
        state: &Arc<PingState>,
        max_failures: u32,
    ) {
        let queue = queue.clone();
        let state = state.clone();
        task.start_on(runtime, move || {
            let queue = queue.clone();
            let state = state.clone();
            async move {
                match queue.ping().await {
                    Ok(()) => {
                        state.failures.store(0, Ordering::SeqCst);
                        Ok(Control::Continue)
                    }
                    Err(e) if e.is_stale() => Ok(Control::Continue),
                    Err(e) => {
                        let failures = state.failures.fetch_add(1, Ordering::SeqCst) + 1;
                        if failures <= max_failures {
                            debug!(failures, max_failures, error = %e, "Server ping failed");
                            return Ok(Control::Continue);
                        }
                        warn!(failures, error = %e, "Server unhealthy, too many failed pings");
                        state.enabled.store(false, Ordering::SeqCst);
                        let on_unhealthy = state.on_unhealthy.lock().clone();
                        if let Some(on_unhealthy) = on_unhealthy {
                            on_unhealthy();
                        }
                        Ok(Control::Stop)
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        self.state.enabled.store(false, Ordering::SeqCst);
        drop(self.call_watch.lock().take());
        self.task.stop();
    }

    /// Whether a ping loop is currently scheduled
    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Whether the monitor is started (possibly paused for a call)
    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.failures.load(Ordering::SeqCst)
    }
}
