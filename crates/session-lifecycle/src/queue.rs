//! Serialized operation queue over the signaling connection
//!
//! The signaling connection cannot take overlapping mutating operations, so
//! every `connect`, `disconnect`, `register`, `ping`, ... goes through
//! [`ConnectionQueue::run`]. Entries execute strictly one at a time in
//! submission order; `tokio::sync::Mutex` is fair, which gives the FIFO.
//!
//! With discard-if-not-actual enabled (the default), each entry gets a
//! ticket. An entry whose ticket is no longer the latest when it settles
//! resolves with [`LifecycleError::Stale`] instead of its real result, and
//! an entry already superseded when its turn comes is not started at all.
//! Network calls in flight are never aborted; only their outcome is ignored.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{ConnectParams, SetParams, TelephonyCheckParams};
use crate::error::{LifecycleError, Result, SignalingError};

/// Async operations of the signaling collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalingConnection: Send + Sync {
    async fn connect(&self, params: &ConnectParams) -> std::result::Result<(), SignalingError>;

    async fn disconnect(&self) -> std::result::Result<(), SignalingError>;

    async fn register(&self) -> std::result::Result<(), SignalingError>;

    async fn unregister(&self) -> std::result::Result<(), SignalingError>;

    /// Out-of-band reachability probe; `Ok` means the server can take a
    /// connection again
    async fn check_telephony(&self, params: &TelephonyCheckParams) -> std::result::Result<(), SignalingError>;

    async fn send_options(&self, target: &str, body: &str) -> std::result::Result<(), SignalingError>;

    async fn ping(&self) -> std::result::Result<(), SignalingError>;

    async fn set(&self, params: &SetParams) -> std::result::Result<(), SignalingError>;
}

/// FIFO of mutating operations against one connection
pub struct ConnectionQueue {
    connection: Arc<dyn SignalingConnection>,
    lane: Mutex<()>,
    latest: AtomicU64,
    stopped: AtomicBool,
    discard_if_not_actual: bool,
}

impl ConnectionQueue {
    pub fn new(connection: Arc<dyn SignalingConnection>) -> Self {
        Self {
            connection,
            lane: Mutex::new(()),
            latest: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            discard_if_not_actual: true,
        }
    }

    pub fn with_discard_if_not_actual(mut self, discard: bool) -> Self {
        self.discard_if_not_actual = discard;
        self
    }

    fn is_actual(&self, ticket: u64) -> bool {
        !self.discard_if_not_actual || self.latest.load(Ordering::SeqCst) == ticket
    }

    /// Run one operation after every previously submitted one has settled
    pub async fn run<T, F, Fut>(&self, name: &'static str, operation: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn SignalingConnection>) -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, SignalingError>> + Send,
        T: Send,
    {
        if self.is_stopped() {
            return Err(LifecycleError::QueueStopped);
        }

        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let _lane = self.lane.lock().await;

        if self.is_stopped() {
            debug!(operation = name, ticket, "Queue stopped before operation started");
            return Err(LifecycleError::QueueStopped);
        }
        if !self.is_actual(ticket) {
            debug!(operation = name, ticket, "Skipping superseded operation");
            return Err(LifecycleError::Stale);
        }

        debug!(operation = name, ticket, "Running queued operation");
        let result = operation(self.connection.clone()).await;

        if self.is_stopped() {
            debug!(operation = name, ticket, "Discarding result, queue stopped");
            return Err(LifecycleError::QueueStopped);
        }
        if !self.is_actual(ticket) {
            debug!(operation = name, ticket, "Discarding result of superseded operation");
            return Err(LifecycleError::Stale);
        }

        result.map_err(LifecycleError::from)
    }

    pub async fn connect(&self, params: &ConnectParams) -> Result<()> {
        let params = params.clone();
        self.run("connect", move |c| async move { c.connect(&params).await }).await
    }

    /// Tear down any half-open connection, then connect; one queue entry
    pub async fn reconnect(&self, params: &ConnectParams) -> Result<()> {
        let params = params.clone();
        self.run("reconnect", move |c| async move {
            if let Err(e) = c.disconnect().await {
                debug!(error = %e, "Ignoring disconnect failure before connect");
            }
            c.connect(&params).await
        })
        .await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.run("disconnect", |c| async move { c.disconnect().await }).await
    }

    pub async fn register(&self) -> Result<()> {
        self.run("register", |c| async move { c.register().await }).await
    }

    pub async fn unregister(&self) -> Result<()> {
        self.run("unregister", |c| async move { c.unregister().await }).await
    }

    pub async fn check_telephony(&self, params: &TelephonyCheckParams) -> Result<()> {
        let params = params.clone();
        self.run("check_telephony", move |c| async move { c.check_telephony(&params).await })
            .await
    }

    pub async fn send_options(&self, target: &str, body: &str) -> Result<()> {
        let (target, body) = (target.to_string(), body.to_string());
        self.run("send_options", move |c| async move { c.send_options(&target, &body).await })
            .await
    }

    pub async fn ping(&self) -> Result<()> {
        self.run("ping", |c| async move { c.ping().await }).await
    }

    pub async fn set(&self, params: &SetParams) -> Result<()> {
        let params = params.clone();
        self.run("set", move |c| async move { c.set(&params).await }).await
    }

    /// Stop accepting work
    ///
    /// Queued entries resolve with [`LifecycleError::QueueStopped`] without
    /// running; the entry in flight finishes but its result is discarded.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.latest.fetch_add(1, Ordering::SeqCst);
            debug!("Connection queue stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
