//! Wire-level liveness tracking for one session (§4.6 Running/Writer).
//! Distinct from [`crate::activity::ActivityClock`]: that one tracks *user*
//! idle time for the keepalive worker (C5); this one tracks *frame* idle
//! time so the writer can decide when to ping and when to declare the
//! socket dead, mirroring the teacher's `last_data_at` variable in
//! `tunnel/dispatcher.rs::run`, promoted here to a small shared type so both
//! the reader and writer tasks can touch it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct WireClock {
    epoch: Instant,
    nanos: AtomicU64,
}

impl WireClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            nanos: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        let nanos = Instant::now().saturating_duration_since(self.epoch).as_nanos() as u64;
        self.nanos.store(nanos, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        let nanos = self.nanos.load(Ordering::Relaxed);
        let last = self.epoch + Duration::from_nanos(nanos);
        Instant::now().saturating_duration_since(last)
    }
}

impl Default for WireClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_resets_elapsed_to_near_zero() {
        let clock = WireClock::new();
        std::thread::sleep(Duration::from_millis(15));
        clock.touch();
        assert!(clock.elapsed() < Duration::from_millis(15));
    }
}
