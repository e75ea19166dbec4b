//! Session coordinator and event adapter scenarios

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_stream::StreamExt;

use rvoip_session_lifecycle::machines::{
    CallStatus, ConnectionStatus, IncomingStatus, IncomingTerminalReason, PresentationStatus,
};
use rvoip_session_lifecycle::{
    CallEvent, CallerInfo, EventAdapter, EventEmitter, IncomingCallEvent, SessionCoordinator,
    SessionEvent, SessionSnapshot, SignalingEvent,
};

#[test]
fn test_incoming_call_consumed_by_accept() {
    let coordinator = SessionCoordinator::new();

    coordinator.send(SessionEvent::IncomingRinging {
        caller: CallerInfo::new("101"),
    });
    coordinator.send(SessionEvent::CallAccepted);

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.incoming.status, IncomingStatus::Consumed);
    assert_eq!(snapshot.incoming.last_reason, Some(IncomingTerminalReason::Consumed));
    assert_eq!(snapshot.call.status, CallStatus::Accepted);
    assert_eq!(
        snapshot.incoming.caller.map(|caller| caller.incoming_number),
        Some("101".to_string())
    );
}

#[test]
fn test_disconnect_clears_call_presentation_and_incoming() {
    let coordinator = SessionCoordinator::new();
    let signaling = EventEmitter::new();
    let calls = EventEmitter::new();
    let incoming = EventEmitter::new();
    let _adapter = EventAdapter::attach(&coordinator, &signaling, &calls, &incoming);

    for event in [
        SignalingEvent::ConnectStarted,
        SignalingEvent::Connecting,
        SignalingEvent::Connected,
        SignalingEvent::Registered,
    ] {
        signaling.emit(&event);
    }
    incoming.emit(&IncomingCallEvent::Incoming(CallerInfo::new("202").with_host("10.0.0.7")));
    for event in [
        CallEvent::Accepted,
        CallEvent::Confirmed,
        CallEvent::PresentationStart,
        CallEvent::PresentationStarted,
    ] {
        calls.emit(&event);
    }

    let before = coordinator.snapshot();
    assert_eq!(before.call.status, CallStatus::InCall);
    assert_eq!(before.presentation.status, PresentationStatus::Active);
    assert_eq!(before.incoming.status, IncomingStatus::Consumed);

    signaling.emit(&SignalingEvent::Disconnected);

    let after = coordinator.snapshot();
    assert_eq!(after.connection.status, ConnectionStatus::Disconnected);
    assert_eq!(after.call.status, CallStatus::Ended);
    assert_eq!(after.presentation.status, PresentationStatus::Idle);
    assert_eq!(after.incoming.status, IncomingStatus::Idle);
    assert!(!after.is_call_active());
}

#[test]
fn test_snapshot_round_trips_through_json() {
    let coordinator = SessionCoordinator::new();
    coordinator.send(SessionEvent::ConnectionStart);
    coordinator.send(SessionEvent::ConnectionConnected);
    coordinator.send(SessionEvent::IncomingRinging {
        caller: CallerInfo::new("303").with_display_name("Front Desk"),
    });

    let snapshot = coordinator.snapshot();
    let json = serde_json::to_string(&snapshot).unwrap();
    let restored: SessionSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, snapshot);
}

#[test]
fn test_selector_listener_fires_only_on_selected_change() {
    let coordinator = SessionCoordinator::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let _subscription = {
        let seen = seen.clone();
        coordinator.subscribe_selected(
            |snapshot| snapshot.connection.status,
            move |status| seen.lock().push(*status),
        )
    };

    coordinator.send(SessionEvent::ConnectionStart);
    coordinator.send(SessionEvent::CallConnecting);
    coordinator.send(SessionEvent::CallRinging);
    coordinator.send(SessionEvent::ConnectionConnected);
    coordinator.send(SessionEvent::ScreenStarting);
    coordinator.send(SessionEvent::ConnectionRegistered);
    // already registered: not a change of the selected slice
    coordinator.send(SessionEvent::ConnectionRegistered);

    assert_eq!(
        *seen.lock(),
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Registered,
        ]
    );
}

#[test]
fn test_dropped_subscription_stops_notifications() {
    let coordinator = SessionCoordinator::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let subscription = {
        let calls = calls.clone();
        coordinator.subscribe(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    coordinator.send(SessionEvent::ConnectionStart);
    drop(subscription);
    coordinator.send(SessionEvent::ConnectionConnected);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_change_stream_follows_adapter_events() {
    let coordinator = SessionCoordinator::new();
    let signaling = EventEmitter::new();
    let _adapter = EventAdapter::attach(&coordinator, &signaling, &EventEmitter::new(), &EventEmitter::new());
    let mut changes = coordinator.changes();

    signaling.emit(&SignalingEvent::ConnectStarted);
    signaling.emit(&SignalingEvent::Connecting);

    let first = changes.next().await.unwrap().unwrap();
    assert_eq!(first.event, "CONNECTION.START");
    assert_eq!(first.previous.connection.status, ConnectionStatus::Idle);
    assert_eq!(first.current.connection.status, ConnectionStatus::Connecting);

    let second = changes.next().await.unwrap().unwrap();
    assert_eq!(second.event, "CONNECTION.INIT");
    assert_eq!(second.current.connection.status, ConnectionStatus::Initializing);
}
