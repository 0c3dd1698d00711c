//! Reconnection mechanism
//!
//! Generic reconnection helper with exponential backoff and jitter. Sessions
//! use it both for the initial transport connect and for recovery after a
//! transport failure; once the attempt cap is reached the session remains in
//! ERROR pending external intervention.

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;

/// Reconnection error types
#[derive(Error, Debug)]
pub enum ReconnectError {
    /// Maximum retry attempts exceeded
    #[error("Maximum reconnection attempts exceeded")]
    MaxAttemptsExceeded,

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Reconnection policy configuration
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum retry attempts (0 means unlimited)
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Backoff multiplier for exponential delay
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            jitter: true,
        }
    }
}

/// Reconnection statistics tracking
#[derive(Debug, Default, Clone)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub successful_reconnects: u64,
    pub failed_reconnects: u64,
    pub last_connected: Option<Instant>,
}

/// Generic reconnection helper with backoff and statistics
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    current_attempt: u32,
    stats: ReconnectStats,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current_attempt: 0,
            stats: ReconnectStats::default(),
        }
    }

    pub fn stats(&self) -> &ReconnectStats {
        &self.stats
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// Reset attempt accounting after a confirmed-good connection
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// Whether the attempt cap has been reached
    pub fn attempts_exhausted(&self) -> bool {
        self.policy.max_attempts > 0 && self.current_attempt >= self.policy.max_attempts
    }

    /// Calculate the next retry delay with exponential backoff
    pub fn calculate_next_delay(&self) -> Duration {
        let attempt = self.current_attempt.saturating_sub(1);
        let mut delay = self
            .policy
            .initial_delay
            .mul_f64(self.policy.backoff_multiplier.powi(attempt as i32));

        if delay > self.policy.max_delay {
            delay = self.policy.max_delay;
        }

        // Jitter of up to ±25% spreads simultaneous reconnects apart
        if self.policy.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }

    /// Account for a new attempt; returns the backoff delay to wait before
    /// it (none for the first attempt). Sessions interleave this delay with
    /// cancellation so a stop request never waits out a backoff.
    pub fn begin_attempt(&mut self) -> Option<Duration> {
        self.current_attempt += 1;
        self.stats.total_attempts += 1;
        if self.current_attempt > 1 {
            Some(self.calculate_next_delay())
        } else {
            None
        }
    }

    /// Record a successful connection and reset attempt accounting
    pub fn mark_success(&mut self) {
        self.stats.successful_reconnects += 1;
        self.stats.last_connected = Some(Instant::now());
        self.reset();
    }

    /// Record a failed attempt
    pub fn mark_failure(&mut self) {
        self.stats.failed_reconnects += 1;
    }

    /// Execute one reconnection attempt, waiting the backoff delay first
    pub async fn execute_reconnect<F, Fut, E>(
        &mut self,
        mut connect_fn: F,
    ) -> Result<(), ReconnectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        if self.attempts_exhausted() {
            warn!(
                "Maximum reconnection attempts ({}) exceeded",
                self.policy.max_attempts
            );
            return Err(ReconnectError::MaxAttemptsExceeded);
        }

        if let Some(delay) = self.begin_attempt() {
            debug!("Waiting {:?} before reconnection attempt", delay);
            tokio::time::sleep(delay).await;
        }

        let start_time = Instant::now();
        match connect_fn().await {
            Ok(()) => {
                info!(
                    "Reconnection successful after {:?} (attempt {})",
                    start_time.elapsed(),
                    self.current_attempt
                );
                self.mark_success();
                Ok(())
            },
            Err(e) => {
                warn!(
                    "Reconnection attempt {} failed: {}",
                    self.current_attempt, e
                );
                self.mark_failure();
                Err(ReconnectError::ConnectionFailed(e.to_string()))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter(max_attempts: u32, initial_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_exponential_backoff() {
        let mut helper = ReconnectHelper::new(policy_without_jitter(5, 100));

        helper.current_attempt = 1;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(100));
        helper.current_attempt = 2;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(200));
        helper.current_attempt = 3;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_max_delay_limit() {
        let mut helper = ReconnectHelper::new(policy_without_jitter(10, 1000));
        helper.current_attempt = 10;
        assert!(helper.calculate_next_delay() <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_max_attempts() {
        let mut helper = ReconnectHelper::new(policy_without_jitter(2, 10));
        let connect_fn = || async { Err::<(), _>("Connection failed") };

        assert!(helper.execute_reconnect(connect_fn).await.is_err());
        assert!(helper.execute_reconnect(connect_fn).await.is_err());
        assert!(matches!(
            helper.execute_reconnect(connect_fn).await,
            Err(ReconnectError::MaxAttemptsExceeded)
        ));
        assert!(helper.attempts_exhausted());
    }

    #[tokio::test]
    async fn test_successful_reconnect_resets_attempts() {
        let mut helper = ReconnectHelper::new(policy_without_jitter(3, 10));
        let failing = || async { Err::<(), _>("nope") };
        let succeeding = || async { Ok::<(), &str>(()) };

        assert!(helper.execute_reconnect(failing).await.is_err());
        assert_eq!(helper.current_attempt(), 1);

        assert!(helper.execute_reconnect(succeeding).await.is_ok());
        assert_eq!(helper.current_attempt(), 0);
        assert_eq!(helper.stats().successful_reconnects, 1);
    }
}
