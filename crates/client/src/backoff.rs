//! Reconnect tuning and the backoff schedule

use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

/// Client-side session tuning
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Reconnect attempts allowed before giving up
    pub max_attempts: u32,
    /// Time allowed between opening the socket and the `connected` ack
    pub handshake_timeout: Duration,
    /// How often the client sends a liveness ping
    pub ping_interval: Duration,
    /// Silence after which the connection is treated as dead
    pub pong_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(25),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl ReconnectConfig {
    /// Fresh schedule, starting again from `initial_delay`
    pub fn schedule(&self) -> BackoffSchedule {
        BackoffSchedule::new(self.initial_delay, self.max_delay)
    }
}

/// Doubling delays from the initial delay, capped at the max delay
///
/// No jitter is applied, so consecutive delays never decrease. The first
/// delay is exactly the initial delay; later ones are computed in whole
/// milliseconds from half of it, so an odd initial delay in milliseconds
/// doubles from one millisecond less.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    first: Option<Duration>,
    strategy: ExponentialBackoff,
    max_delay: Duration,
}

impl BackoffSchedule {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        // ExponentialBackoff yields base^n * factor, so base 2 with
        // factor initial/2 gives initial, 2*initial, 4*initial, ...
        let initial_ms = u64::try_from(initial_delay.as_millis()).unwrap_or(u64::MAX);
        let factor = (initial_ms / 2).max(1);
        let mut strategy = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(max_delay);
        // Replaced by the exact initial delay
        strategy.next();

        Self {
            first: Some(initial_delay.min(max_delay)),
            strategy,
            max_delay,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        if let Some(first) = self.first.take() {
            return first;
        }
        self.strategy.next().unwrap_or(self.max_delay)
    }
}
