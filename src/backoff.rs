//! Reconnect backoff (C7, §4.7). Doubles on each failed attempt, capped,
//! and multiplicatively jittered so a fleet of disconnected agents doesn't
//! reconnect in lockstep — generalizes the teacher's `registration::client`
//! `jitter_delay` (additive `SystemTime`-seeded jitter on a doubling delay)
//! to the spec's multiplicative `[0.8, 1.2]` jitter window.

use std::time::Duration;

use rand::Rng;

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);
const JITTER_LOW: f64 = 0.8;
const JITTER_HIGH: f64 = 1.2;

pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self { current: INITIAL_DELAY }
    }

    /// The delay to sleep before the next reconnect attempt, jittered.
    /// Advances the internal base delay for the attempt after that.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = rand::thread_rng().gen_range(JITTER_LOW..=JITTER_HIGH);
        let jittered = self.current.mul_f64(jitter);

        self.current = (self.current * 2).min(MAX_DELAY);

        jittered
    }

    /// Reset to the initial delay after a session ran long enough to be
    /// considered healthy (§4.7: at least 30s in `Running`).
    pub fn reset(&mut self) {
        self.current = INITIAL_DELAY;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_is_near_initial_within_jitter() {
        let mut backoff = Backoff::new();
        let delay = backoff.next_delay();
        assert!(delay >= INITIAL_DELAY.mul_f64(JITTER_LOW));
        assert!(delay <= INITIAL_DELAY.mul_f64(JITTER_HIGH));
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let mut backoff = Backoff::new();
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay <= MAX_DELAY.mul_f64(JITTER_HIGH));
            last = delay;
        }
        assert!(last > INITIAL_DELAY);
    }

    #[test]
    fn reset_returns_to_initial_delay() {
        let mut backoff = Backoff::new();
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        let delay = backoff.next_delay();
        assert!(delay <= INITIAL_DELAY.mul_f64(JITTER_HIGH));
    }
}
