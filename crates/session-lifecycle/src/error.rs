//! Error types for session lifecycle coordination
//!
//! Two layers of errors live here. [`SignalingError`] is what the signaling
//! collaborator reports from its async operations. [`LifecycleError`] is what
//! this crate reports: it wraps signaling failures and adds the outcomes the
//! operation queue and the reconnect engine produce on their own
//! (stale operations, cancellation, a stopped queue).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for session lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// SIP status code for a request timeout
pub const REQUEST_TIMEOUT_STATUS: u16 = 408;

/// Errors reported by the signaling collaborator
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Credentials were rejected by the registrar or proxy
    #[error("Authentication failed ({status_code:?}): {reason}")]
    Authentication {
        /// SIP status code of the rejection (401, 403, 407)
        status_code: Option<u16>,
        /// Reason phrase
        reason: String,
        /// The challenge exchange ended in a request timeout
        timed_out: bool,
    },

    /// A request went unanswered
    #[error("Request timeout")]
    RequestTimeout,

    /// Transport could not be established or was lost
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// The endpoint is not ready for this operation
    #[error("Not ready: {message}")]
    NotReady { message: String },

    /// Anything else the collaborator could not classify
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SignalingError {
    /// Create an authentication error
    pub fn authentication(status_code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Authentication {
            status_code,
            reason: reason.into(),
            timed_out: false,
        }
    }

    /// Create an authentication error caused by a request timeout
    pub fn authentication_timeout(reason: impl Into<String>) -> Self {
        Self::Authentication {
            status_code: Some(REQUEST_TIMEOUT_STATUS),
            reason: reason.into(),
            timed_out: true,
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a not-ready error
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady {
            message: message.into(),
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Whether a request timeout caused this error, on any path
    pub fn is_request_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout | Self::Authentication { timed_out: true, .. })
    }

    /// SIP status code carried by this error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Authentication { status_code, .. } => *status_code,
            Self::RequestTimeout => Some(REQUEST_TIMEOUT_STATUS),
            _ => None,
        }
    }
}

/// Errors produced by the lifecycle layer
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The operation was superseded by a newer one before it settled
    #[error("Operation superseded by a newer request")]
    Stale,

    /// The operation or the delay preceding it was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation queue has been stopped
    #[error("Operation queue stopped")]
    QueueStopped,

    /// A signaling operation failed
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Logging could not be initialised
    #[error("Logging error: {message}")]
    Logging { message: String },
}

impl LifecycleError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a logging error
    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    /// Whether this result was discarded because a newer operation superseded it
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::QueueStopped)
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Signaling(e) if e.is_authentication())
    }

    pub fn is_request_timeout(&self) -> bool {
        matches!(self, Self::Signaling(e) if e.is_request_timeout())
    }

    /// Classify this error for the reconnect engine
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Stale => FailureKind::Stale,
            Self::Cancelled | Self::QueueStopped => FailureKind::Cancelled,
            Self::Signaling(e) if e.is_authentication() => FailureKind::Authentication,
            Self::Signaling(e) if e.is_request_timeout() => FailureKind::Timeout,
            _ => FailureKind::Generic,
        }
    }
}

/// Classification of a failed connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Superseded; reported as cancellation, never as failure
    Stale,
    /// Credentials rejected; terminal
    Authentication,
    /// Generic failure caused by a request timeout
    Timeout,
    /// Any other failure; retried
    Generic,
    /// Explicit cancellation
    Cancelled,
}

/// Last error remembered by a state machine snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Human readable cause
    pub cause: String,
    /// SIP status code, when the failure came from a response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl FailureInfo {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
            status_code: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }
}

impl From<&SignalingError> for FailureInfo {
    fn from(error: &SignalingError) -> Self {
        Self {
            cause: error.to_string(),
            status_code: error.status_code(),
        }
    }
}

impl std::fmt::Display for FailureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} ({})", self.cause, code),
            None => write!(f, "{}", self.cause),
        }
    }
}
