//! Exponential backoff shared by chunk upload retries and stream reconnects

use std::time::Duration;

/// Backoff configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Upper bound on the un-jittered delay
    pub max_delay: Duration,

    /// Growth factor applied after every attempt
    pub multiplier: f64,

    /// Jitter factor (0.0 - 1.0); the delay is scaled by a uniform
    /// factor in `[1 - jitter, 1 + jitter]`
    pub jitter_factor: f64,
}

impl BackoffConfig {
    /// Chunk upload retries: 100 ms growing 1.5x up to 2 s, ±20 % jitter
    pub fn chunk_upload() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 1.5,
            jitter_factor: 0.2,
        }
    }

    /// Stream reconnects: 0.5 s doubling up to 8 s
    pub fn reconnect() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

/// Stateful delay generator
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay;
        Self {
            config,
            current,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current.min(self.config.max_delay);
        self.attempts += 1;

        let grown = base.as_secs_f64() * self.config.multiplier;
        self.current = Duration::from_secs_f64(grown.min(self.config.max_delay.as_secs_f64()));

        jittered(base, self.config.jitter_factor)
    }

    /// Start over from the initial delay (after a successful connection)
    pub fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Delays handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

fn jittered(delay: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return delay;
    }
    let factor = factor.min(1.0);
    let scale = 1.0 - factor + 2.0 * factor * rand::random::<f64>();
    Duration::from_secs_f64((delay.as_secs_f64() * scale).max(0.0))
}

/// How many times, and how patiently, a request is attempted
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay schedule between attempts
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffConfig::chunk_upload(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact(initial_ms: u64, max_ms: u64, multiplier: f64) -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_reconnect_schedule() {
        let mut backoff = Backoff::new(BackoffConfig::reconnect());
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000, 8000, 8000, 8000]);
        assert_eq!(backoff.attempts(), 7);
    }

    #[test]
    fn test_upload_schedule_without_jitter() {
        let mut backoff = Backoff::new(exact(100, 2000, 1.5));
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 150, 225, 337, 506, 759, 1139, 1708, 2000]);
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = Backoff::new(exact(500, 8000, 2.0));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(BackoffConfig::chunk_upload());
        for _ in 0..200 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(80), "{delay:?}");
            assert!(delay <= Duration::from_millis(120), "{delay:?}");
        }
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.backoff.max_delay, Duration::from_secs(2));
        assert_eq!(policy.backoff.multiplier, 1.5);
        assert_eq!(policy.backoff.jitter_factor, 0.2);
    }
}
