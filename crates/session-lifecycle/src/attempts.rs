//! Attempt tracking for the reconnect engine
//!
//! [`AttemptTracker`] is a bounded counter. [`AttemptsState`] pairs it with
//! the reconnect engine's own status so that a reset of the count always
//! brings the status back to [`ReconnectStatus::Idle`].

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Bounded, increment-only counter with reset
///
/// Invariant: `initial_count <= count <= limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptTracker {
    count: u32,
    initial_count: u32,
    limit: u32,
}

impl AttemptTracker {
    /// `initial_count` is clamped to `limit`
    pub fn new(initial_count: u32, limit: u32) -> Self {
        let initial_count = initial_count.min(limit);
        Self {
            count: initial_count,
            initial_count,
            limit,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn initial_count(&self) -> u32 {
        self.initial_count
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count one attempt; no-op once the limit is reached
    pub fn increment(&mut self) {
        if self.count < self.limit {
            self.count += 1;
        }
    }

    pub fn reset(&mut self) {
        self.count = self.initial_count;
    }

    pub fn has_reached_limit(&self) -> bool {
        self.count >= self.limit
    }
}

/// Status of the reconnect protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconnectStatus {
    Idle,
    Connecting,
    CheckingTelephony,
    /// Attempt parked until the active call ends
    Calling,
}

impl ReconnectStatus {
    /// Whether `self -> next` is a valid reconnect status transition
    ///
    /// Returning to `Idle` is only possible through a reset and is not
    /// listed here.
    pub fn can_transition_to(self, next: ReconnectStatus) -> bool {
        use ReconnectStatus::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Idle, CheckingTelephony)
                | (Connecting, CheckingTelephony)
                | (Connecting, Calling)
                | (CheckingTelephony, Connecting)
                | (Calling, Connecting)
        )
    }
}

impl std::fmt::Display for ReconnectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::CheckingTelephony => "checking-telephony",
            Self::Calling => "calling",
        };
        f.write_str(name)
    }
}

/// Attempt counter plus the reconnect status it drives
#[derive(Debug, Clone)]
pub struct AttemptsState {
    tracker: AttemptTracker,
    status: ReconnectStatus,
}

impl AttemptsState {
    pub fn new(initial_count: u32, limit: u32) -> Self {
        Self {
            tracker: AttemptTracker::new(initial_count, limit),
            status: ReconnectStatus::Idle,
        }
    }

    pub fn count(&self) -> u32 {
        self.tracker.count()
    }

    pub fn limit(&self) -> u32 {
        self.tracker.limit()
    }

    pub fn status(&self) -> ReconnectStatus {
        self.status
    }

    pub fn has_reached_limit(&self) -> bool {
        self.tracker.has_reached_limit()
    }

    pub fn increment(&mut self) {
        self.tracker.increment();
    }

    /// Move the status; invalid transitions are logged and ignored
    ///
    /// Returns whether the status changed. Re-entering the current status is
    /// accepted silently.
    pub fn transition(&mut self, next: ReconnectStatus) -> bool {
        if self.status == next {
            return false;
        }
        if !self.status.can_transition_to(next) {
            warn!(from = %self.status, to = %next, "Ignoring invalid reconnect status transition");
            return false;
        }
        debug!(from = %self.status, to = %next, "Reconnect status changed");
        self.status = next;
        true
    }

    pub fn start_connecting(&mut self) -> bool {
        self.transition(ReconnectStatus::Connecting)
    }

    pub fn start_checking_telephony(&mut self) -> bool {
        self.transition(ReconnectStatus::CheckingTelephony)
    }

    pub fn start_calling(&mut self) -> bool {
        self.transition(ReconnectStatus::Calling)
    }

    /// Restore the initial count and return to idle
    pub fn reset(&mut self) {
        self.tracker.reset();
        if self.status != ReconnectStatus::Idle {
            debug!(from = %self.status, "Reconnect status reset to idle");
        }
        self.status = ReconnectStatus::Idle;
    }
}
