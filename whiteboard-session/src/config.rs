//! Session and relay configuration.

use serde::Deserialize;
use std::time::Duration;

/// Tunables for a [`SessionController`](crate::controller::SessionController).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval between presence heartbeats.
    pub heartbeat_interval_secs: u64,
    /// A collaborator silent for longer than this is dropped.
    pub presence_timeout_secs: u64,
    /// Local inactivity after which we report ourselves idle.
    pub idle_after_secs: u64,
    /// Granularity of the runtime's housekeeping tick.
    pub tick_interval_ms: u64,
    /// First reconnect delay; doubled on every failed attempt.
    pub reconnect_initial_delay_ms: u64,
    /// Upper bound for a single reconnect delay.
    pub reconnect_max_delay_ms: u64,
    /// Failed reconnect attempts tolerated before giving up.
    pub reconnect_max_attempts: u32,
    /// Presence registry capacity (the local user included).
    pub max_collaborators: usize,
    /// Per-connection inbound/outbound queue depth.
    pub channel_capacity: usize,
    /// Time allowed for the relay to answer the handshake.
    pub handshake_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 10,
            presence_timeout_secs: 30,
            idle_after_secs: 60,
            tick_interval_ms: 1000,
            reconnect_initial_delay_ms: 500,
            reconnect_max_delay_ms: 10_000,
            reconnect_max_attempts: 8,
            max_collaborators: 50,
            channel_capacity: 256,
            handshake_timeout_ms: 5000,
        }
    }
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_secs(self.presence_timeout_secs)
    }

    pub fn idle_after(&self) -> Duration {
        Duration::from_secs(self.idle_after_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// WebSocket relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Per-member outbound queue depth
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9191".to_string(),
            channel_capacity: 256,
        }
    }
}
