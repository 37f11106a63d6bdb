//! Per-instance sliding-window counters (§4.2 "State"). A single
//! [`SlidingWindowCounter`] backs both the outbound-request limit (10/min)
//! and the log-volume limit (50/min). The anchor is the *last* event, not the
//! first: every call (accepted or rejected) re-anchors `last_event` to `now`,
//! and the window only resets once `now - last_event >= 60s`. A tumbling
//! window anchored on the first event would let a caller who trickles one
//! call just inside each 60s boundary dodge the limit forever; re-anchoring
//! on the last event closes that gap.

use std::time::{Duration, Instant};

pub struct SlidingWindowCounter {
    count: u32,
    last_event: Option<Instant>,
    limit: u32,
    window: Duration,
}

impl SlidingWindowCounter {
    pub fn new(limit: u32) -> Self {
        Self {
            count: 0,
            last_event: None,
            limit,
            window: Duration::from_secs(60),
        }
    }

    /// Returns `true` and records the event if under the limit; `false` if
    /// the limit is already reached within the current window. Re-anchors
    /// `last_event` to `now` unconditionally, so a run of rejected attempts
    /// keeps the window alive exactly as long as a run of accepted ones.
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&mut self, now: Instant) -> bool {
        let stale = match self.last_event {
            Some(last) => now.duration_since(last) >= self.window,
            None => true,
        };
        if stale {
            self.count = 0;
        }
        self.last_event = Some(now);

        if self.count >= self.limit {
            false
        } else {
            self.count += 1;
            true
        }
    }

    pub fn current_count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let mut c = SlidingWindowCounter::new(10);
        for _ in 0..10 {
            assert!(c.try_acquire());
        }
        assert!(!c.try_acquire());
    }

    #[test]
    fn resets_after_window_elapses() {
        let mut c = SlidingWindowCounter::new(2);
        let t0 = Instant::now();
        assert!(c.try_acquire_at(t0));
        assert!(c.try_acquire_at(t0));
        assert!(!c.try_acquire_at(t0));
        let later = t0 + Duration::from_secs(61);
        assert!(c.try_acquire_at(later));
    }

    #[test]
    fn log_limit_boundary_50() {
        let mut c = SlidingWindowCounter::new(50);
        for _ in 0..50 {
            assert!(c.try_acquire());
        }
        assert!(!c.try_acquire());
    }

    #[test]
    fn http_limit_boundary_10() {
        let mut c = SlidingWindowCounter::new(10);
        for i in 0..10 {
            assert!(c.try_acquire(), "request {i} should succeed");
        }
        assert!(!c.try_acquire(), "11th request should be rejected");
    }

    /// A caller who exhausts the limit early and then trickles one call at a
    /// time must keep getting rejected as long as *some* event keeps landing
    /// within 60s of the last one, even though far more than 60s has elapsed
    /// since the window's first event.
    #[test]
    fn idle_reset_anchors_on_last_event_not_first() {
        let mut c = SlidingWindowCounter::new(10);
        let t0 = Instant::now();
        for i in 0..10 {
            assert!(c.try_acquire_at(t0 + Duration::from_secs(i)), "request {i}");
        }
        // ~31s since the last event (t0+9s): still within the window, still full.
        assert!(!c.try_acquire_at(t0 + Duration::from_secs(40)));
        // ~25s since that rejected attempt: the rejection itself re-anchored
        // the window, so this must still be rejected.
        assert!(!c.try_acquire_at(t0 + Duration::from_secs(65)));
        // Only once 60s have passed with no event at all does it reset.
        assert!(c.try_acquire_at(t0 + Duration::from_secs(130)));
    }
}
