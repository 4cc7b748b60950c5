//! Activity tracker (C4): the single source of truth for "time since last
//! remote request". Lock-free: one atomic nanosecond offset from a
//! process-start epoch, readable and writable from any concurrency context.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rand::Rng;

/// ±7s jitter window applied by `touch_with_jitter` (§4.3 step 2, §4.5).
const JITTER_SECS: f64 = 7.0;

pub struct ActivityClock {
    epoch: Instant,
    nanos_since_epoch: AtomicU64,
}

impl ActivityClock {
    /// A clock that starts out already idle (as if touched at process start).
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            nanos_since_epoch: AtomicU64::new(0),
        }
    }

    /// Record activity right now.
    pub fn touch_now(&self) {
        self.store(Instant::now());
    }

    /// Record activity at "now" plus a uniform jitter in [-7s, +7s], clamped
    /// so the stored instant never exceeds now (§4.3 step 2).
    pub fn touch_with_jitter(&self) {
        let now = Instant::now();
        let jitter_secs = rand::thread_rng().gen_range(-JITTER_SECS..=JITTER_SECS);
        let jittered = if jitter_secs >= 0.0 {
            now + Duration::from_secs_f64(jitter_secs)
        } else {
            now.checked_sub(Duration::from_secs_f64(-jitter_secs))
                .unwrap_or(self.epoch)
        };
        self.store(jittered.min(now));
    }

    /// How long since the last touch.
    pub fn idle_for(&self) -> Duration {
        let nanos = self.nanos_since_epoch.load(Ordering::Relaxed);
        let last_touch = self.epoch + Duration::from_nanos(nanos);
        Instant::now().saturating_duration_since(last_touch)
    }

    fn store(&self, instant: Instant) {
        let nanos = instant.saturating_duration_since(self.epoch).as_nanos() as u64;
        self.nanos_since_epoch.store(nanos, Ordering::Relaxed);
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_now_resets_idle_time_to_near_zero() {
        let clock = ActivityClock::new();
        std::thread::sleep(Duration::from_millis(20));
        clock.touch_now();
        assert!(clock.idle_for() < Duration::from_millis(20));
    }

    #[test]
    fn touch_with_jitter_never_exceeds_now() {
        let clock = ActivityClock::new();
        for _ in 0..200 {
            clock.touch_with_jitter();
            // idle_for must never be negative (i.e. stored instant in the future).
            assert!(clock.idle_for() <= Duration::from_secs(8));
        }
    }

    #[test]
    fn touch_with_jitter_stays_within_bounds() {
        let clock = ActivityClock::new();
        clock.touch_with_jitter();
        // idle_for() is at least 0 and, since jitter is bounded at 7s and the
        // clamp only ever pulls the instant earlier (never later than "now"),
        // never negative and never wildly large either.
        assert!(clock.idle_for() < Duration::from_secs(8));
    }

    #[test]
    fn idle_for_grows_monotonically_without_touch() {
        let clock = ActivityClock::new();
        clock.touch_now();
        let first = clock.idle_for();
        std::thread::sleep(Duration::from_millis(10));
        let second = clock.idle_for();
        assert!(second >= first);
    }
}
