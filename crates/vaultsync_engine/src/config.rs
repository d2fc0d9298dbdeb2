//! Configuration for the reconciliation engine.

use std::time::Duration;

/// Configuration for reconciling with one remote.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identifier of the remote peer.
    pub remote_id: String,
    /// Identifier of this replica (used in pull requests and conflict
    /// tie-breaking).
    pub replica_id: String,
    /// Maximum batch size for push cycles.
    pub push_batch_size: u32,
    /// Maximum batch size for pull cycles.
    pub pull_batch_size: u32,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// Request timeout.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new configuration for the given remote and replica.
    pub fn new(remote_id: impl Into<String>, replica_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            replica_id: replica_id.into(),
            push_batch_size: 100,
            pull_batch_size: 100,
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the push batch size.
    pub fn with_push_batch_size(mut self, size: u32) -> Self {
        self.push_batch_size = size;
        self
    }

    /// Sets the pull batch size.
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Retry policy for transient transport failures.
///
/// [`ReconciliationEngine::sync_with_retry`] sleeps
/// [`RetryConfig::delay_for_attempt`] between attempts: delays grow
/// geometrically from `initial_delay` up to `max_delay`, with up to 25%
/// jitter so replicas that fail in lockstep do not retry in lockstep.
///
/// [`ReconciliationEngine::sync_with_retry`]: crate::ReconciliationEngine::sync_with_retry
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Ceiling on the backoff delay, before jitter.
    pub max_delay: Duration,
    /// Geometric growth factor between attempts.
    pub backoff_multiplier: f64,
    /// Spread delays with jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// A doubling backoff starting at 100ms, capped at 30s.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// A single attempt; failures surface immediately.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the delay before the second attempt.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay ceiling.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the geometric growth factor.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// The delay to wait before `attempt` (0-indexed; the first attempt
    /// never waits).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1) as i32;
        let mut delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        delay = delay.min(self.max_delay.as_secs_f64());
        if self.add_jitter {
            delay += delay * 0.25 * jitter_fraction();
        }
        Duration::from_secs_f64(delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Pseudo-random fraction in `[0, 1)` derived from the clock; spreads
/// retries well enough without an RNG crate.
fn jitter_fraction() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 997) / 997.0
}
