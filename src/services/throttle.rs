//! Rate gate for detection cycles
//!
//! At most one detection cycle per interval. A denied sample is dropped, not queued.

use std::time::{Duration, Instant};

/// Default minimum spacing between detection cycles
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(5000);

/// Fixed-interval gate driven by a monotonic clock
#[derive(Debug, Clone)]
pub struct ThrottleGate {
    /// Minimum spacing between allowed cycles
    interval: Duration,
    /// When the last allowed cycle started; None until the first one
    last_run: Option<Instant>,
}

impl ThrottleGate {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_run: None }
    }

    /// Decide whether a cycle may run at `now`, recording it if so
    ///
    /// The first call always passes. Afterwards a cycle passes once `interval` has
    /// elapsed since the last allowed one. A `now` earlier than the last allowed
    /// cycle is denied.
    pub fn allow(&mut self, now: Instant) -> bool {
        let allowed = match self.last_run {
            None => true,
            Some(last) => now.checked_duration_since(last).is_some_and(|d| d >= self.interval),
        };
        if allowed {
            self.last_run = Some(now);
        }
        allowed
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Forget the last run so the next sample passes immediately
    pub fn reset(&mut self) {
        self.last_run = None;
    }
}

impl Default for ThrottleGate {
    fn default() -> Self {
        Self::new(DEFAULT_THROTTLE_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_first_call_passes() {
        let mut gate = ThrottleGate::default();
        assert!(gate.allow(Instant::now()));
    }

    #[test]
    fn test_interval_spacing() {
        let mut gate = ThrottleGate::new(ms(5000));
        let t0 = Instant::now();

        assert!(gate.allow(t0));
        assert!(!gate.allow(t0 + ms(1000)));
        assert!(!gate.allow(t0 + ms(4999)));
        assert!(gate.allow(t0 + ms(5000)));
        // Spacing is measured from the last allowed cycle, not the last call
        assert!(!gate.allow(t0 + ms(9000)));
        assert!(gate.allow(t0 + ms(10000)));
    }

    #[test]
    fn test_denied_calls_do_not_extend_window() {
        let mut gate = ThrottleGate::new(ms(100));
        let t0 = Instant::now();

        assert!(gate.allow(t0));
        for i in 1..10 {
            assert!(!gate.allow(t0 + ms(i * 10 - 1)));
        }
        assert!(gate.allow(t0 + ms(100)));
    }

    #[test]
    fn test_clock_going_backwards_is_denied() {
        let mut gate = ThrottleGate::new(ms(100));
        let t0 = Instant::now() + ms(1000);

        assert!(gate.allow(t0));
        assert!(!gate.allow(t0 - ms(500)));
    }

    #[test]
    fn test_reset() {
        let mut gate = ThrottleGate::new(ms(5000));
        let t0 = Instant::now();
        assert!(gate.allow(t0));
        gate.reset();
        assert!(gate.allow(t0 + ms(1)));
        assert_eq!(gate.interval(), ms(5000));
    }
}
