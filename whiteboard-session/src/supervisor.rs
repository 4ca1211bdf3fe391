//! Connection-loss supervision with capped exponential backoff.
//!
//! ```text
//!            attempt_started()            connected()
//!   Idle ───────────────────► Connecting ─────────────► Connected
//!                                ▲    │                     │
//!                 attempt_started│    │attempt_failed()     │connection_lost()
//!                                │    ▼                     ▼
//!                             Disconnected ◄─────────────────┘
//! ```
//!
//! The supervisor only decides *when* to retry; the controller performs
//! the attempt and reports back.

use tokio::time::Duration;

use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Retry schedule: `min(initial * 2^(attempt-1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max: max.max(initial),
            max_attempts,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_initial_delay_ms),
            Duration::from_millis(config.reconnect_max_delay_ms),
            config.reconnect_max_attempts,
        )
    }

    /// Delay before the 1-based `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// What the controller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supervision {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
pub struct ReconnectSupervisor {
    backoff: Backoff,
    state: ConnectionState,
    attempts: u32,
}

impl ReconnectSupervisor {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            state: ConnectionState::Idle,
            attempts: 0,
        }
    }

    /// An established connection dropped. Starts a fresh retry sequence.
    pub fn connection_lost(&mut self) -> Supervision {
        self.state = ConnectionState::Disconnected;
        self.attempts = 0;
        self.schedule()
    }

    pub fn attempt_started(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    pub fn attempt_failed(&mut self) -> Supervision {
        self.state = ConnectionState::Disconnected;
        self.schedule()
    }

    pub fn connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.attempts = 0;
    }

    /// Back to idle; used on stop and before a manual reconnect.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Idle;
        self.attempts = 0;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Retries scheduled in the current sequence.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    fn schedule(&mut self) -> Supervision {
        if self.attempts >= self.backoff.max_attempts {
            log::warn!("Giving up after {} reconnect attempts", self.attempts);
            return Supervision::Exhausted {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        let delay = self.backoff.delay(self.attempts);
        log::debug!("Reconnect attempt {} scheduled in {delay:?}", self.attempts);
        Supervision::Retry {
            attempt: self.attempts,
            delay,
        }
    }
}

impl Default for ReconnectSupervisor {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}
