//! Exponential backoff with jitter for heartbeat delivery.

use std::time::Duration;

use rand::Rng;

/// Backoff over transport failures: the delay starts at the regular report
/// interval, doubles per consecutive failure, and is capped at the
/// configured ceiling. Jitter keeps a fleet of reporters from synchronizing
/// their retries.
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        Self {
            floor,
            ceiling: ceiling.max(floor),
            jitter: 0.25,
            attempt: 0,
        }
    }

    /// Delay before the next attempt after one more failure.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);

        let base = (self.floor.as_secs_f64() * 2f64.powi(self.attempt as i32 - 1))
            .min(self.ceiling.as_secs_f64());

        let jitter_range = base * self.jitter;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_secs_f64(
            (base + jitter)
                .max(self.floor.as_secs_f64())
                .min(self.ceiling.as_secs_f64()),
        )
    }

    /// Reset after a delivered report.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn without_jitter(floor: u64, ceiling: u64) -> Backoff {
        let mut backoff = Backoff::new(Duration::from_secs(floor), Duration::from_secs(ceiling));
        backoff.jitter = 0.0;
        backoff
    }

    #[test]
    fn delay_doubles_until_the_ceiling() {
        let mut backoff = without_jitter(20, 120);
        assert_eq!(backoff.next_delay(), Duration::from_secs(20));
        assert_eq!(backoff.next_delay(), Duration::from_secs(40));
        assert_eq!(backoff.next_delay(), Duration::from_secs(80));
        assert_eq!(backoff.next_delay(), Duration::from_secs(120));
        assert_eq!(backoff.next_delay(), Duration::from_secs(120));
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = without_jitter(20, 120);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(20));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let mut backoff = Backoff::new(Duration::from_secs(20), Duration::from_secs(120));
        for _ in 0..50 {
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_secs(20));
            assert!(delay <= Duration::from_secs(120));
        }
    }
}
