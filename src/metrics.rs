//! Lightweight timing of protocol phases.

use std::time::Instant;

/// Records the elapsed time of a scope to tracing when dropped.
pub struct ScopedTimer {
    label: &'static str,
    start: Instant,
}

impl ScopedTimer {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        tracing::debug!(
            target: "repshare::metrics",
            phase = self.label,
            elapsed_us = self.start.elapsed().as_micros() as u64,
        );
    }
}
