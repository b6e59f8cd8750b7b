//! Relay configuration.

use crate::{RelayError, RelayResult};
use std::time::Duration;

/// Relay configuration.
///
/// Defaults are tuned for a local SQLite outbox: a one second poll keeps
/// delivery latency low without hammering the database, and the stale
/// threshold is generous enough that a healthy relay never has its own
/// claims swept out from under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// How often the processor polls for pending messages.
    pub poll_interval: Duration,

    /// Maximum number of messages claimed per cycle.
    pub batch_size: usize,

    /// Delivery attempts (including crashed ones) before a message is
    /// failed permanently.
    pub max_attempts: i32,

    /// Age at which a processing claim is considered abandoned and
    /// eligible for the recovery sweep.
    pub stale_threshold: Duration,

    /// Per-message handler invocation timeout.
    pub handler_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            max_attempts: 5,
            stale_threshold: Duration::from_secs(300),
            handler_timeout: Duration::from_secs(30),
        }
    }
}

impl RelayConfig {
    /// Check the configuration for values that would stall or corrupt
    /// delivery.
    pub fn validate(&self) -> RelayResult<()> {
        if self.batch_size == 0 {
            return Err(RelayError::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_attempts < 1 {
            return Err(RelayError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(RelayError::Config("poll_interval must be non-zero".to_string()));
        }
        if self.handler_timeout.is_zero() {
            return Err(RelayError::Config("handler_timeout must be non-zero".to_string()));
        }
        // A threshold below the handler timeout lets the sweep release rows
        // whose handler is still running
        if self.stale_threshold < self.handler_timeout {
            return Err(RelayError::Config(
                "stale_threshold must be at least handler_timeout".to_string(),
            ));
        }
        Ok(())
    }
}
