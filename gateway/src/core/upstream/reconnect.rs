//! Bounded reconnection policy.
//!
//! [`ReconnectionController`] is pure bookkeeping: it counts consecutive
//! failures and tells the caller whether to retry (and after how long) or give
//! up. The caller owns the timer, so the policy is testable without one.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for automatic reconnection behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectionConfig {
    /// Enable automatic reconnection on connection loss.
    pub enabled: bool,

    /// Maximum number of reconnection attempts before giving up.
    /// Set to 0 for unlimited attempts.
    pub max_attempts: u32,

    /// Initial delay between reconnection attempts (milliseconds).
    pub initial_delay_ms: u64,

    /// Maximum delay between reconnection attempts (milliseconds).
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff. 1.0 gives a fixed delay.
    pub backoff_multiplier: f32,

    /// Whether to add jitter to the delay to prevent thundering herd.
    pub jitter: bool,
}

/// Relay default: three attempts, two seconds apart.
impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(2))
    }
}

impl ReconnectionConfig {
    /// Create a config with reconnection disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Fixed-delay policy with at most `max_attempts` retries (0 = unlimited).
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let delay_ms = delay.as_millis() as u64;
        Self {
            enabled: true,
            max_attempts,
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Fixed-delay policy that never gives up.
    pub fn unbounded(delay: Duration) -> Self {
        Self::fixed(0, delay)
    }

    /// Calculate the delay for a given attempt number using exponential backoff.
    /// Returns the delay in milliseconds.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;

        // base_delay * multiplier^(attempt-1), capped
        let delay = base_delay * multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay = delay.min(self.max_delay_ms.max(self.initial_delay_ms) as f64);

        if self.jitter {
            // Up to 25% either way
            let jitter_range = delay * 0.25;
            let jitter = rand_jitter(jitter_range);
            (delay + jitter).max(0.0) as u64
        } else {
            delay as u64
        }
    }

    /// Check if another attempt is allowed after `attempt` attempts were made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt < self.max_attempts)
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts == 0
    }
}

/// Generate a pseudo-random jitter value using a simple LCG.
fn rand_jitter(range: f64) -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    let normalized = random / (1u64 << 31) as f64;
    (normalized - 0.5) * 2.0 * range
}

/// What to do after a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Wait `delay`, then make attempt number `attempt` (1-based).
    Retry { attempt: u32, delay: Duration },
    /// The bound was just exceeded. Returned exactly once.
    GiveUp { attempts: u32 },
    /// Already gave up earlier; do nothing.
    Exhausted,
}

/// Per-connection attempt counter driven by [`ReconnectionConfig`].
#[derive(Debug, Clone)]
pub struct ReconnectionController {
    config: ReconnectionConfig,
    attempts: u32,
    exhausted: bool,
}

impl ReconnectionController {
    pub fn new(config: ReconnectionConfig) -> Self {
        Self {
            config,
            attempts: 0,
            exhausted: false,
        }
    }

    /// Record a failure (of the live connection or of a reconnect attempt).
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if self.exhausted {
            return ReconnectDecision::Exhausted;
        }

        if !self.config.should_retry(self.attempts) {
            self.exhausted = true;
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }

        self.attempts = self.attempts.saturating_add(1);
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: Duration::from_millis(self.config.calculate_delay(self.attempts)),
        }
    }

    /// A connection opened: the counter starts over, even after a give-up.
    pub fn on_success(&mut self) {
        self.attempts = 0;
        self.exhausted = false;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn config(&self) -> &ReconnectionConfig {
        &self.config
    }
}
