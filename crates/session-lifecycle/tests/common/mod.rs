//! Shared fixtures for the scenario tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use rvoip_session_lifecycle::{
    ConnectParams, EventEmitter, ReconnectFailure, ReconnectHandler, SetParams,
    SignalingConnection, SignalingError, SignalingEvent, TelephonyCheckParams,
};

type Script = Mutex<VecDeque<Result<(), SignalingError>>>;

/// Signaling connection that replays scripted results
///
/// Each operation pops the next scripted result and succeeds once its
/// script is exhausted. When built with an emitter, a successful connect
/// raises the signaling events a real stack would.
#[derive(Default)]
pub struct ScriptedConnection {
    connect_script: Script,
    telephony_script: Script,
    ping_script: Script,
    signaling: Option<EventEmitter<SignalingEvent>>,
    connect_gate: Option<Arc<Semaphore>>,
    connected: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub telephony_checks: AtomicUsize,
    pub pings: AtomicUsize,
}

impl ScriptedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signaling(mut self, signaling: EventEmitter<SignalingEvent>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    /// Every connect waits for one permit of `gate` before it settles
    pub fn with_connect_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.connect_gate = Some(gate);
        self
    }

    pub fn script_connect(self, result: Result<(), SignalingError>) -> Self {
        self.connect_script.lock().push_back(result);
        self
    }

    pub fn script_telephony(self, result: Result<(), SignalingError>) -> Self {
        self.telephony_script.lock().push_back(result);
        self
    }

    pub fn script_ping(self, result: Result<(), SignalingError>) -> Self {
        self.ping_script.lock().push_back(result);
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn next(script: &Script) -> Result<(), SignalingError> {
        script.lock().pop_front().unwrap_or(Ok(()))
    }

    fn emit(&self, event: SignalingEvent) {
        if let Some(signaling) = &self.signaling {
            signaling.emit(&event);
        }
    }
}

#[async_trait]
impl SignalingConnection for ScriptedConnection {
    async fn connect(&self, _params: &ConnectParams) -> Result<(), SignalingError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.emit(SignalingEvent::ConnectStarted);
        self.emit(SignalingEvent::Connecting);
        tokio::task::yield_now().await;
        if let Some(gate) = &self.connect_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        match Self::next(&self.connect_script) {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                self.emit(SignalingEvent::Connected);
                self.emit(SignalingEvent::Registered);
                Ok(())
            }
            Err(e) => {
                self.emit(SignalingEvent::ConnectFailed { error: (&e).into() });
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), SignalingError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(SignalingEvent::Disconnected);
        }
        Ok(())
    }

    async fn register(&self) -> Result<(), SignalingError> {
        self.emit(SignalingEvent::Registered);
        Ok(())
    }

    async fn unregister(&self) -> Result<(), SignalingError> {
        self.emit(SignalingEvent::Unregistered);
        Ok(())
    }

    async fn check_telephony(&self, _params: &TelephonyCheckParams) -> Result<(), SignalingError> {
        self.telephony_checks.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.telephony_script)
    }

    async fn send_options(&self, _target: &str, _body: &str) -> Result<(), SignalingError> {
        Ok(())
    }

    async fn ping(&self) -> Result<(), SignalingError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.ping_script)
    }

    async fn set(&self, _params: &SetParams) -> Result<(), SignalingError> {
        Ok(())
    }
}

/// Reconnect handler that records every callback
#[derive(Default)]
pub struct RecordingHandler {
    pub before_attempt: AtomicUsize,
    pub successes: AtomicUsize,
    pub cancels: AtomicUsize,
    pub failures: Mutex<Vec<ReconnectFailure>>,
}

impl RecordingHandler {
    pub fn before_attempts(&self) -> usize {
        self.before_attempt.load(Ordering::SeqCst)
    }

    pub fn success_count(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> Vec<ReconnectFailure> {
        self.failures.lock().clone()
    }
}

impl ReconnectHandler for RecordingHandler {
    fn on_before_attempt_connect(&self) {
        self.before_attempt.fetch_add(1, Ordering::SeqCst);
    }

    fn on_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_fail(&self, failure: ReconnectFailure) {
        self.failures.lock().push(failure);
    }

    fn on_cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn connect_params() -> ConnectParams {
    ConnectParams::new("sip:pbx.example.com", "alice")
        .with_password("secret")
        .with_display_name("Alice")
}

