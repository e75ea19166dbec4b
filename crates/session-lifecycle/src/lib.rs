//! # Session Lifecycle - SIP softphone session state and reconnection
//!
//! This crate models the lifecycle of one softphone session:
//! - **machines**: connection, call, incoming-call and presentation state machines
//! - **coordinator**: runs the four machines as one composition and publishes snapshots
//! - **adapter**: translates signaling and call collaborator events into session events
//! - **queue**: serializes every mutating operation on the signaling connection
//! - **reconnect**: bounded-retry reconnect with telephony checks and server pings
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_session_lifecycle::{
//!     AutoReconnectEngine, ConnectParams, ConnectionQueue, EventAdapter, EventEmitter,
//!     LifecycleConfig, NoopReconnectHandler, SessionCoordinator, SignalingConnection,
//! };
//!
//! async fn run(connection: Arc<dyn SignalingConnection>) {
//!     let coordinator = SessionCoordinator::new();
//!     let signaling = EventEmitter::new();
//!     let calls = EventEmitter::new();
//!     let incoming = EventEmitter::new();
//!     let _adapter = EventAdapter::attach(&coordinator, &signaling, &calls, &incoming);
//!
//!     let _registered = coordinator.subscribe_selected(
//!         |snapshot| snapshot.is_registered(),
//!         |registered| println!("registered: {registered}"),
//!     );
//!
//!     let engine = AutoReconnectEngine::new(
//!         &LifecycleConfig::default(),
//!         Arc::new(ConnectionQueue::new(connection)),
//!         Arc::new(coordinator.clone()),
//!         Arc::new(NoopReconnectHandler),
//!     );
//!     engine.start(ConnectParams::new("sip:pbx.example.com", "alice")).await;
//! }
//! ```

pub mod adapter;
pub mod attempts;
pub mod config;
pub mod coordinator;
pub mod deferred;
pub mod error;
pub mod events;
pub mod logging;
pub mod machines;
pub mod monitor;
pub mod queue;
pub mod reconnect;

// Re-export main types
pub use adapter::EventAdapter;
pub use attempts::{AttemptTracker, AttemptsState, ReconnectStatus};
pub use config::{ConnectParams, LifecycleConfig, PingConfig, ReconnectConfig, SetParams, TelephonyCheckParams};
pub use coordinator::{SessionCoordinator, SessionId, SessionSnapshot, SnapshotChanged, SnapshotStream, StateSource};
pub use deferred::{DeferredCommandRunner, DeferredOutcome};
pub use error::{FailureInfo, FailureKind, LifecycleError, Result, SignalingError};
pub use events::{CallEvent, CallerInfo, EventEmitter, IncomingCallEvent, SignalingEvent, Subscription};
pub use logging::{setup_logging, LoggingConfig};
pub use machines::SessionEvent;
pub use monitor::{RepeatingTask, ServerPingMonitor, TelephonyCheckMonitor};
pub use queue::{ConnectionQueue, SignalingConnection};
pub use reconnect::{AutoReconnectEngine, FailReason, NoopReconnectHandler, ReconnectFailure, ReconnectHandler};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
