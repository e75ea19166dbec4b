//! Configuration for session lifecycle coordination
//!
//! Every value has a production default and can be overridden either through
//! the `with_*` builder methods or by deserializing from TOML. Durations are
//! stored in milliseconds so that configuration files stay plain integers.
//!
//! ```rust
//! use rvoip_session_lifecycle::config::LifecycleConfig;
//! use std::time::Duration;
//!
//! let config = LifecycleConfig::from_toml_str(r#"
//!     [reconnect]
//!     attempt_limit = 5
//!     reconnect_delay_ms = 1000
//! "#).unwrap();
//!
//! assert_eq!(config.reconnect.attempt_limit, 5);
//! assert_eq!(config.reconnect.reconnect_delay(), Duration::from_secs(1));
//! assert_eq!(config.ping.max_failures, 2);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};

/// Default number of consecutive reconnect attempts before escalating
pub const DEFAULT_ATTEMPT_LIMIT: u32 = 30;
/// Default delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
/// Default interval of the telephony check loop
pub const DEFAULT_TELEPHONY_CHECK_INTERVAL_MS: u64 = 15_000;
/// Default interval of the server ping monitor
pub const DEFAULT_PING_INTERVAL_MS: u64 = 15_000;
/// Default number of consecutive ping failures tolerated
pub const DEFAULT_PING_MAX_FAILURES: u32 = 2;

/// Reconnect engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Attempts before switching to telephony checks
    pub attempt_limit: u32,
    /// Value the attempt tracker resets to
    pub initial_attempt_count: u32,
    /// Fixed delay between failed attempts
    pub reconnect_delay_ms: u64,
    /// Poll interval once attempts are exhausted
    pub telephony_check_interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            attempt_limit: DEFAULT_ATTEMPT_LIMIT,
            initial_attempt_count: 0,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            telephony_check_interval_ms: DEFAULT_TELEPHONY_CHECK_INTERVAL_MS,
        }
    }
}

impl ReconnectConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn telephony_check_interval(&self) -> Duration {
        Duration::from_millis(self.telephony_check_interval_ms)
    }

    pub fn with_attempt_limit(mut self, limit: u32) -> Self {
        self.attempt_limit = limit;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_telephony_check_interval(mut self, interval: Duration) -> Self {
        self.telephony_check_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Check the values for consistency
    pub fn validate(&self) -> Result<()> {
        if self.attempt_limit == 0 {
            return Err(LifecycleError::config("attempt_limit must be greater than zero"));
        }
        if self.initial_attempt_count > self.attempt_limit {
            return Err(LifecycleError::config(format!(
                "initial_attempt_count ({}) exceeds attempt_limit ({})",
                self.initial_attempt_count, self.attempt_limit
            )));
        }
        if self.telephony_check_interval_ms == 0 {
            return Err(LifecycleError::config("telephony_check_interval_ms must be greater than zero"));
        }
        Ok(())
    }
}

/// Server ping monitor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingConfig {
    /// Interval between pings
    pub interval_ms: u64,
    /// Consecutive failures tolerated before the server is reported unhealthy
    pub max_failures: u32,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_PING_INTERVAL_MS,
            max_failures: DEFAULT_PING_MAX_FAILURES,
        }
    }
}

impl PingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(LifecycleError::config("ping interval_ms must be greater than zero"));
        }
        Ok(())
    }
}

/// Complete configuration surface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub reconnect: ReconnectConfig,
    pub ping: PingConfig,
}

impl LifecycleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| LifecycleError::config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_ping(mut self, ping: PingConfig) -> Self {
        self.ping = ping;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.reconnect.validate()?;
        self.ping.validate()
    }
}

/// Parameters handed to the signaling collaborator's `connect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    /// Registrar / proxy URI (e.g. "sip:pbx.example.com")
    pub server_uri: String,
    /// Address of record user part
    pub user: String,
    /// Digest password; never logged
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub display_name: Option<String>,
    /// Whether to REGISTER after the transport is up
    pub register: bool,
    /// Registration expiry in seconds
    pub register_expires: u32,
    pub user_agent: Option<String>,
}

impl ConnectParams {
    pub fn new(server_uri: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            server_uri: server_uri.into(),
            user: user.into(),
            password: None,
            display_name: None,
            register: true,
            register_expires: 300,
            user_agent: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_register(mut self, register: bool) -> Self {
        self.register = register;
        self
    }

    /// Parameters for an out-of-band reachability probe of the same server
    pub fn telephony_check_params(&self) -> TelephonyCheckParams {
        TelephonyCheckParams {
            server_uri: self.server_uri.clone(),
            user: self.user.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

/// Parameters handed to the signaling collaborator's `check_telephony`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelephonyCheckParams {
    pub server_uri: String,
    pub user: String,
    pub display_name: Option<String>,
}

/// Parameters handed to the signaling collaborator's `set`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetParams {
    pub display_name: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LifecycleConfig::default();
        assert_eq!(config.reconnect.attempt_limit, 30);
        assert_eq!(config.reconnect.reconnect_delay(), Duration::from_millis(3000));
        assert_eq!(config.reconnect.telephony_check_interval(), Duration::from_millis(15000));
        assert_eq!(config.ping.interval(), Duration::from_millis(15000));
        assert_eq!(config.ping.max_failures, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_override() {
        let config = LifecycleConfig::from_toml_str(
            r#"
            [ping]
            interval_ms = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.ping.interval(), Duration::from_secs(5));
        assert_eq!(config.ping.max_failures, 2);
        assert_eq!(config.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let err = LifecycleConfig::from_toml_str("[reconnect]\nattempt_limit = 0\n").unwrap_err();
        assert!(matches!(err, LifecycleError::Configuration { .. }));

        let config = ReconnectConfig {
            initial_attempt_count: 5,
            ..ReconnectConfig::default().with_attempt_limit(3)
        };
        assert!(config.validate().is_err());

        assert!(PingConfig::default().with_interval(Duration::ZERO).validate().is_err());
        assert!(LifecycleConfig::from_toml_str("reconnect = 3").is_err());
    }

    #[test]
    fn test_connect_params() {
        let params = ConnectParams::new("sip:pbx.example.com", "alice")
            .with_password("secret")
            .with_display_name("Alice");
        let check = params.telephony_check_params();
        assert_eq!(check.server_uri, "sip:pbx.example.com");
        assert_eq!(check.display_name.as_deref(), Some("Alice"));
        assert!(params.register);
    }
}
