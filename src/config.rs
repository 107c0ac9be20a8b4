//! Relay configuration parsed from environment variables.
//!
//! Every knob has a default, so an empty environment yields the standard
//! limits: 512-byte frames, 256 queued frames per client, 10s write wait,
//! 60s pong wait and a ping every 54s.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_WRITE_WAIT_SECS: u64 = 10;
pub const DEFAULT_PONG_WAIT_SECS: u64 = 60;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
    #[error("ping period ({ping_ms}ms) must be shorter than pong wait ({pong_ms}ms)")]
    PingNotBeforeDeadline { ping_ms: u128, pong_ms: u128 },
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub bind: String,
    pub port: u16,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per client.
    pub queue_capacity: usize,
    /// Deadline for a single frame write.
    pub write_wait: Duration,
    /// Read deadline; refreshed by every inbound frame, pongs included.
    pub pong_wait: Duration,
    /// Keepalive ping interval. Always 9/10 of `pong_wait`.
    pub ping_period: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_wait: Duration::from_secs(DEFAULT_WRITE_WAIT_SECS),
            pong_wait: Duration::from_secs(DEFAULT_PONG_WAIT_SECS),
            ping_period: ping_period_for(Duration::from_secs(DEFAULT_PONG_WAIT_SECS)),
        }
    }
}

impl RelayConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 8080
    /// - `RELAY_BIND`: default `0.0.0.0`
    /// - `RELAY_MAX_MESSAGE_SIZE`: default 512
    /// - `RELAY_QUEUE_CAPACITY`: default 256
    /// - `RELAY_WRITE_WAIT_SECS`: default 10
    /// - `RELAY_PONG_WAIT_SECS`: default 60
    ///
    /// Unparseable values fall back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        let pong_wait = Duration::from_secs(env_parse("RELAY_PONG_WAIT_SECS", DEFAULT_PONG_WAIT_SECS));
        Self {
            bind: std::env::var("RELAY_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string()),
            port: env_parse("PORT", DEFAULT_PORT),
            max_message_size: env_parse("RELAY_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE),
            queue_capacity: env_parse("RELAY_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
            write_wait: Duration::from_secs(env_parse("RELAY_WRITE_WAIT_SECS", DEFAULT_WRITE_WAIT_SECS)),
            pong_wait,
            ping_period: ping_period_for(pong_wait),
        }
    }

    /// Replace the write and pong deadlines, re-deriving the ping period.
    #[must_use]
    pub fn with_timeouts(mut self, write_wait: Duration, pong_wait: Duration) -> Self {
        self.write_wait = write_wait;
        self.pong_wait = pong_wait;
        self.ping_period = ping_period_for(pong_wait);
        self
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Check limits that would otherwise panic or never fire at runtime.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero limit or deadline, or a ping period that
    /// does not precede the pong deadline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_size == 0 {
            return Err(ConfigError::Zero { key: "RELAY_MAX_MESSAGE_SIZE" });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero { key: "RELAY_QUEUE_CAPACITY" });
        }
        if self.write_wait.is_zero() {
            return Err(ConfigError::Zero { key: "RELAY_WRITE_WAIT_SECS" });
        }
        if self.pong_wait.is_zero() {
            return Err(ConfigError::Zero { key: "RELAY_PONG_WAIT_SECS" });
        }
        if self.ping_period.is_zero() || self.ping_period >= self.pong_wait {
            return Err(ConfigError::PingNotBeforeDeadline {
                ping_ms: self.ping_period.as_millis(),
                pong_ms: self.pong_wait.as_millis(),
            });
        }
        Ok(())
    }

    /// Socket address string for the listener.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

/// Pings go out at 9/10 of the read deadline so a healthy peer's pong lands
/// before the deadline expires.
#[must_use]
pub fn ping_period_for(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
