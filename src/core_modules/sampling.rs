// THEORY:
// A live camera delivers frames far faster than the 1 Hz data rate the
// experiment wants, so the preview stays smooth while only a fraction of
// frames become data. The `SamplingClock` is that gate. It keeps a
// fixed-period timestamp grid: after each accepted frame the threshold
// advances by exactly one period rather than resetting to "now", so
// processing jitter never accumulates into drift.
//
// File-backed sources decode slower than the data rate, so the session
// bypasses the clock entirely for them; this module only ever sees the
// live regime.

/// Decides which incoming frame timestamps become data samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingClock {
    period_us: u64,
    /// Next timestamp at which a frame is due. `None` until the first
    /// frame after a reset, which baselines the grid and always counts.
    next_due_us: Option<u64>,
}

impl SamplingClock {
    /// Panics on a non-positive or non-finite rate; a degenerate period
    /// would otherwise silently accept or reject every frame.
    pub fn new(sample_rate_hz: f64) -> Self {
        assert!(
            sample_rate_hz > 0.0 && sample_rate_hz.is_finite(),
            "sample rate must be a positive, finite frequency, got {sample_rate_hz}"
        );
        Self {
            period_us: (1e6 / sample_rate_hz) as u64,
            next_due_us: None,
        }
    }

    /// Returns true if the frame at `timestamp_us` is a new data sample,
    /// advancing the grid by one period when it is.
    pub fn accept(&mut self, timestamp_us: u64) -> bool {
        match self.next_due_us {
            None => {
                self.next_due_us = Some(timestamp_us + self.period_us);
                true
            }
            Some(next) if timestamp_us >= next => {
                self.next_due_us = Some(next + self.period_us);
                true
            }
            Some(_) => false,
        }
    }

    /// Re-arms the baseline; the next frame always counts.
    pub fn reset(&mut self) {
        self.next_due_us = None;
    }
}
