//! Reconnect backoff: exponential with an upper bound and +/-30% jitter

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt
    pub initial: Duration,
    /// Upper bound for any single delay
    pub max: Duration,
    pub multiplier: f64,
    /// Add random jitter to each delay (±30%)
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial,
            config,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt; grows the base for the one after
    pub fn next_delay(&mut self) -> Duration {
        let delay = apply_jitter(self.current, self.config.jitter).min(self.config.max);

        self.attempts += 1;
        self.current = Duration::from_millis(
            ((self.current.as_millis() as f64 * self.config.multiplier)
                .min(self.config.max.as_millis() as f64)) as u64,
        );
        delay
    }

    /// Back to the initial delay after a connection succeeds
    pub fn reset(&mut self) {
        self.current = self.config.initial;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

fn apply_jitter(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_delays_double_until_capped() {
        let mut backoff = Backoff::new(no_jitter());
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(backoff.attempts(), 7);
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let mut backoff = Backoff::new(no_jitter());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.attempts(), 1);
    }

    #[test]
    fn test_jitter_stays_within_thirty_percent() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_secs(10),
            ..Default::default()
        });
        let delay = backoff.next_delay();
        assert!(delay >= Duration::from_secs(7), "{delay:?}");
        assert!(delay <= Duration::from_secs(13), "{delay:?}");
    }

    #[test]
    fn test_jittered_delay_never_exceeds_max() {
        let config = BackoffConfig {
            initial: Duration::from_secs(30),
            ..Default::default()
        };
        for _ in 0..50 {
            let mut backoff = Backoff::new(config.clone());
            assert!(backoff.next_delay() <= Duration::from_secs(30));
        }
    }
}
