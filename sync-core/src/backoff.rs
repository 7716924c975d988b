//! Reconnection backoff with jitter.
//!
//! The delay ceiling doubles with every attempt: `min(base * 2^attempt, cap)`.
//! The actual delay is drawn uniformly from `[0, ceiling)` so that many
//! nodes dropped by the same outage do not reconnect in lockstep.
//!
//! The attempt counter resets once a connection has stayed up for
//! `stable_after`; a flapping link keeps backing off.

use std::time::Duration;

/// Exponential backoff state for one reconnecting transport.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    stable_after: Duration,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff starting at `base`, never exceeding `cap`.
    pub fn new(base: Duration, cap: Duration, stable_after: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            stable_after,
            attempt: 0,
        }
    }

    /// Number of consecutive failed or dropped connections.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Upper bound of the next delay, before jitter.
    pub fn ceiling(&self) -> Duration {
        ceiling_for(self.base, self.cap, self.attempt)
    }

    /// Draw the next delay and count the attempt.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);
        jitter(ceiling)
    }

    /// Report how long the last connection stayed up.
    ///
    /// Returns true if it counted as stable and the attempt counter was reset.
    pub fn connection_lasted(&mut self, uptime: Duration) -> bool {
        if uptime >= self.stable_after {
            self.reset();
            true
        } else {
            false
        }
    }

    /// Start over from `base`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// `min(base * 2^attempt, cap)` without overflow.
fn ceiling_for(base: Duration, cap: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(cap, |delay| delay.min(cap))
}

/// Uniform random duration in `[0, ceiling)`.
fn jitter(ceiling: Duration) -> Duration {
    let nanos = ceiling.as_nanos().min(u64::MAX as u128) as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => Duration::from_nanos(u64::from_le_bytes(bytes) % nanos),
        // No entropy source: fall back to half the ceiling, still below it.
        Err(_) => Duration::from_nanos(nanos / 2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(
            Duration::from_millis(100),
            Duration::from_millis(1000),
            Duration::from_secs(3),
        )
    }

    #[test]
    fn ceiling_doubles_until_cap() {
        let mut backoff = backoff();
        let mut ceilings = Vec::new();
        for _ in 0..6 {
            ceilings.push(backoff.ceiling().as_millis());
            backoff.next_delay();
        }
        assert_eq!(ceilings, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn delay_is_below_ceiling() {
        let mut backoff = backoff();
        for _ in 0..50 {
            let ceiling = backoff.ceiling();
            let delay = backoff.next_delay();
            assert!(delay < ceiling, "{:?} not below {:?}", delay, ceiling);
        }
    }

    #[test]
    fn jitter_creates_variance() {
        // Probabilistic: 20 draws from a 1s range colliding is vanishingly unlikely.
        let delays: Vec<Duration> = (0..20).map(|_| jitter(Duration::from_secs(1))).collect();
        let min = delays.iter().min().unwrap();
        let max = delays.iter().max().unwrap();
        assert!(max > min, "expected jitter variance, got {:?}", delays);
    }

    #[test]
    fn huge_attempt_count_saturates_at_cap() {
        let mut backoff = backoff();
        backoff.attempt = 200;
        assert_eq!(backoff.ceiling(), Duration::from_millis(1000));
        backoff.attempt = u32::MAX;
        backoff.next_delay();
        assert_eq!(backoff.attempt(), u32::MAX);
    }

    #[test]
    fn stable_connection_resets_attempts() {
        let mut backoff = backoff();
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        assert!(!backoff.connection_lasted(Duration::from_secs(1)));
        assert_eq!(backoff.attempt(), 2);

        assert!(backoff.connection_lasted(Duration::from_secs(3)));
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.ceiling(), Duration::from_millis(100));
    }

    #[test]
    fn zero_base_gives_zero_delay() {
        let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO, Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }
}
