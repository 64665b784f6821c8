//! Jittered exponential backoff.

use std::time::Duration;

/// Source of randomness for backoff jitter.
pub trait RandomSource: Send {
    fn random(&mut self) -> u64;
}

/// Thread-local RNG from the `rand` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn random(&mut self) -> u64 {
        rand::random()
    }
}

/// Replays a fixed list of values, cycling when exhausted. Useful for
/// reproducible simulations.
#[derive(Debug, Clone)]
pub struct SequenceRandom {
    values: Vec<u64>,
    next: usize,
}

impl SequenceRandom {
    pub fn new(values: Vec<u64>) -> Self {
        Self { values, next: 0 }
    }
}

impl RandomSource for SequenceRandom {
    fn random(&mut self) -> u64 {
        if self.values.is_empty() {
            return 0;
        }
        let v = self.values[self.next % self.values.len()];
        self.next += 1;
        v
    }
}

/// Backoff whose window grows as `(2^n - 1) * base` and whose delay is a
/// uniform draw within the window, capped at `max`.
///
/// The window stops growing once it exceeds `max`.
pub struct JitteredBackoff {
    base_ms: u64,
    max_ms: u64,
    current_retry: u32,
    random: Box<dyn RandomSource>,
}

impl JitteredBackoff {
    pub fn new(base: Duration, max: Duration, random: Box<dyn RandomSource>) -> Self {
        let base_ms = (base.as_millis() as u64).max(1);
        Self {
            base_ms,
            max_ms: (max.as_millis() as u64).max(base_ms),
            current_retry: 1,
            random,
        }
    }

    /// Current jitter window in milliseconds.
    fn window_ms(&self) -> u64 {
        let multiplier = 1u64
            .checked_shl(self.current_retry)
            .map_or(u64::MAX, |v| v - 1);
        multiplier.saturating_mul(self.base_ms)
    }

    /// Delay before the next retry.
    pub fn next_backoff(&mut self) -> Duration {
        let window = self.window_ms();
        if window <= self.max_ms {
            self.current_retry += 1;
        }
        let jittered = self.random.random() % window;
        Duration::from_millis(jittered.min(self.max_ms))
    }
}

impl std::fmt::Debug for JitteredBackoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitteredBackoff")
            .field("base_ms", &self.base_ms)
            .field("max_ms", &self.max_ms)
            .field("current_retry", &self.current_retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn backoff(base: u64, max: u64, values: Vec<u64>) -> JitteredBackoff {
        JitteredBackoff::new(
            Duration::from_millis(base),
            Duration::from_millis(max),
            Box::new(SequenceRandom::new(values)),
        )
    }

    fn ms(d: Duration) -> u64 {
        d.as_millis() as u64
    }

    #[test]
    fn default_intervals_window_grows() {
        let mut b = backoff(25, 250, vec![49, 149, 349]);
        assert_eq!(ms(b.next_backoff()), 24);
        assert_eq!(ms(b.next_backoff()), 74);
        assert_eq!(ms(b.next_backoff()), 174);
    }

    #[test]
    fn custom_intervals_are_capped() {
        let mut b = backoff(100, 1200, vec![149, 350, 751, 1499]);
        assert_eq!(ms(b.next_backoff()), 49);
        assert_eq!(ms(b.next_backoff()), 50);
        assert_eq!(ms(b.next_backoff()), 51);
        assert_eq!(ms(b.next_backoff()), 1200);
    }

    #[test]
    fn window_stops_growing_after_cap() {
        let mut b = backoff(100, 1000, vec![0]);
        for _ in 0..20 {
            b.next_backoff();
        }
        // 100, 300, 700 fit; 1500 exceeds the cap and is not grown further.
        assert_eq!(b.window_ms(), 1500);
    }

    #[test]
    fn empty_sequence_yields_zero() {
        let mut r = SequenceRandom::new(Vec::new());
        assert_eq!(r.random(), 0);
    }

    proptest! {
        #[test]
        fn delay_stays_within_window_and_cap(
            base in 1u64..500,
            factor in 1u64..20,
            draws in proptest::collection::vec(any::<u64>(), 1..16),
        ) {
            let max = base * factor;
            let mut b = backoff(base, max, draws.clone());
            for n in 1..=draws.len() as u32 {
                let window = ((1u64 << n.min(40)) - 1).saturating_mul(base);
                let d = ms(b.next_backoff());
                prop_assert!(d <= max);
                prop_assert!(d < window || d == max);
            }
        }
    }
}
