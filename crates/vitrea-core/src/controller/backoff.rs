use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;

use crate::config::ReconnectConfig;

/// Largest doubling applied to the initial delay.
const MAX_DOUBLINGS: u32 = 20;

/// Reconnect delays for one session loop.
///
/// Delay `n` is `min(initial * 2^n, max)` scaled into 75%..=125% by a
/// spread derived from a per-loop seed, so controllers restarted together
/// do not retry in lockstep.
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
    seed: u64,
}

impl Backoff {
    pub(crate) fn new(config: &ReconnectConfig) -> Self {
        Self::with_seed(config, RandomState::new().build_hasher().finish())
    }

    fn with_seed(config: &ReconnectConfig, seed: u64) -> Self {
        Self {
            initial: config.initial_delay,
            max: config.max_delay,
            attempt: 0,
            seed,
        }
    }

    /// Attempts since the last reset.
    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Back to the initial delay after a session that made it to Live.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let doubled = self
            .initial
            .saturating_mul(1 << self.attempt.min(MAX_DOUBLINGS));
        let ceiling = doubled.min(self.max);

        let spread = u32::try_from(mix(self.seed ^ u64::from(self.attempt)) % 51).unwrap_or(0);
        self.attempt = self.attempt.saturating_add(1);
        ceiling.saturating_mul(75 + spread) / 100
    }
}

/// splitmix64 finalizer.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within_spread(delay: Duration, ceiling: Duration) -> bool {
        delay >= ceiling * 3 / 4 && delay <= ceiling * 5 / 4
    }

    #[test]
    fn delays_double_within_the_spread() {
        let mut backoff = Backoff::with_seed(&ReconnectConfig::default(), 7);
        for ceiling in [1, 2, 4, 8, 16] {
            let delay = backoff.next_delay();
            assert!(
                within_spread(delay, Duration::from_secs(ceiling)),
                "{delay:?} is not within 25% of {ceiling}s"
            );
        }
        assert_eq!(backoff.attempt(), 5);
    }

    #[test]
    fn delays_cap_at_max_delay() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        let mut backoff = Backoff::with_seed(&config, 1);
        for _ in 0..40 {
            assert!(backoff.next_delay() <= Duration::from_millis(12_500));
        }
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::with_seed(&ReconnectConfig::default(), 3);
        backoff.attempt = u32::MAX;
        assert!(backoff.next_delay() <= Duration::from_millis(37_500));
        assert_eq!(backoff.attempt(), u32::MAX);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = Backoff::with_seed(&ReconnectConfig::default(), 9);
        for _ in 0..6 {
            backoff.next_delay();
        }
        backoff.reset();
        assert!(within_spread(backoff.next_delay(), Duration::from_secs(1)));
    }

    #[test]
    fn seeds_spread_retries_apart() {
        let config = ReconnectConfig::default();
        let delays = |seed| {
            let mut backoff = Backoff::with_seed(&config, seed);
            (0..8).map(|_| backoff.next_delay()).collect::<Vec<_>>()
        };
        assert_eq!(delays(11), delays(11));
        assert_ne!(delays(11), delays(12));
    }
}
