// Path: crates/telemetry/src/time.rs
use std::time::Instant;

/// Reports the elapsed time of a scope to `observe` when dropped.
pub struct Timer<F: FnMut(f64)> {
    observe: F,
    start: Instant,
}

impl<F: FnMut(f64)> Timer<F> {
    /// Starts a timer that hands the elapsed seconds to `observe` on drop.
    pub fn new(observe: F) -> Self {
        Self {
            observe,
            start: Instant::now(),
        }
    }
}

impl<F: FnMut(f64)> Drop for Timer<F> {
    fn drop(&mut self) {
        (self.observe)(self.start.elapsed().as_secs_f64());
    }
}
