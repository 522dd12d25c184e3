// =============================================================================
// Tick throttle — consumer-side sampling of a live stream
// =============================================================================
//
// Sampling the tick stream is a consumer concern; the multiplexer delivers
// everything. A display widget that repaints at most once a second wraps its
// subscription loop with this leading-edge sampler: the first tick passes
// immediately, then everything inside the window is dropped.
// =============================================================================

use std::time::{Duration, Instant};

/// Leading-edge throttle over an event stream.
#[derive(Debug)]
pub struct Throttle {
    window: Duration,
    last_admitted: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_admitted: None,
        }
    }

    /// Whether an event arriving at `now` should pass.
    pub fn admit_at(&mut self, now: Instant) -> bool {
        match self.last_admitted {
            Some(last) if now.duration_since(last) < self.window => false,
            _ => {
                self.last_admitted = Some(now);
                true
            }
        }
    }

    /// Whether an event arriving now should pass.
    pub fn admit(&mut self) -> bool {
        self.admit_at(Instant::now())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_passes_immediately() {
        let mut t = Throttle::new(Duration::from_secs(1));
        assert!(t.admit_at(Instant::now()));
    }

    #[test]
    fn events_inside_window_are_dropped() {
        let start = Instant::now();
        let mut t = Throttle::new(Duration::from_secs(1));

        assert!(t.admit_at(start));
        assert!(!t.admit_at(start + Duration::from_millis(100)));
        assert!(!t.admit_at(start + Duration::from_millis(999)));
        assert!(t.admit_at(start + Duration::from_millis(1000)));
    }

    #[test]
    fn window_restarts_from_last_admitted() {
        let start = Instant::now();
        let mut t = Throttle::new(Duration::from_secs(1));

        assert!(t.admit_at(start));
        assert!(t.admit_at(start + Duration::from_millis(1500)));
        // Window now anchored at +1500 ms, not +1000 ms.
        assert!(!t.admit_at(start + Duration::from_millis(2400)));
        assert!(t.admit_at(start + Duration::from_millis(2500)));
    }
}
