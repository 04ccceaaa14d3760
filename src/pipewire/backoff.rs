use std::time::Duration;

use crate::config::ReconnectConfig;

/// Exponential reconnect delay: doubles per retry up to the configured cap.
/// `None` from [`Backoff::next_delay`] means give up.
///
/// Two things reset independently. Reaching the ready point of a session
/// clears the failure count, so the attempt limit only counts consecutive
/// failed reconnects. Only a session that stayed up for `stable_after`
/// brings the delay back to the initial value.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    max_attempts: u32,
    stable_after: Duration,
    current_ms: u64,
    failures: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        let initial_ms = config.initial_backoff_ms.max(1);
        Self {
            initial_ms,
            max_ms: config.max_backoff_ms.max(initial_ms),
            max_attempts: config.max_attempts,
            stable_after: Duration::from_secs(config.stable_session_secs),
            current_ms: initial_ms,
            failures: 0,
        }
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts != 0 && self.failures >= self.max_attempts {
            return None;
        }
        self.failures += 1;
        let delay = Duration::from_millis(self.current_ms);
        self.current_ms = self.current_ms.saturating_mul(2).min(self.max_ms);
        Some(delay)
    }

    /// A reconnect got through the initial sync.
    pub fn session_ready(&mut self) {
        self.failures = 0;
    }

    /// Called when an established session ends. Long-lived sessions start
    /// the next round of retries from the initial delay again.
    pub fn session_ended(&mut self, uptime: Duration) {
        if uptime >= self.stable_after {
            self.current_ms = self.initial_ms;
        }
    }

    /// Reconnect attempts made since the last session that reached ready.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
